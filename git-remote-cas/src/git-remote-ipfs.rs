//! `git-remote-ipfs` / `git-remote-ipns` / `git-remote-key` entry point.
//!
//! Git invokes a remote helper as `git-remote-<scheme> <remote-name> <url>`
//! with its stdin/stdout wired to the line protocol in [`dispatcher`]. This
//! binary only resolves argv + environment into a [`handler::Handler`] and
//! hands the rest to the dispatcher.

use std::io::{self, BufReader};
use std::process::ExitCode;

use cas::cas::Client;
use cas::config::Config;
use cas::git::Reader;
use cas::naming::DaemonResolver;
use cas::tracker::Tracker;

use git_remote_cas::dispatcher;
use git_remote_cas::handler::{Handler, IpfsHandler, NamingHandler};
use git_remote_cas::url::{self, RemoteUrl};

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("git-remote-cas: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> cas::error::Result<()> {
    let mut args = std::env::args();
    let argv0 = args.next().unwrap_or_default();
    let remote_name = args
        .next()
        .ok_or_else(|| cas::Error::ProtocolError("missing <remote-name> argument".into()))?;
    let url_str = args
        .next()
        .ok_or_else(|| cas::Error::ProtocolError("missing <url> argument".into()))?;

    let config = Config::from_env(&argv0)?;
    let remote_url = url::parse(&url_str)
        .map_err(|e| cas::Error::ProtocolError(format!("{url_str}: {e}")))?;

    let reader = Reader::open_from_env()?;
    let cas_client = Client::new(config.cas_base_url.clone());
    let tracker = Tracker::open(&config.tracker_path)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let input = BufReader::new(stdin.lock());
    let output = stdout.lock();

    // The Tracker must be closed (its open transaction flushed) on every
    // exit path, success or failure, so a crashed or interrupted run never
    // loses already-recorded hash->address mappings.
    let (dispatch_result, tracker) = match remote_url {
        RemoteUrl::Ipfs { address } => {
            let mut handler = IpfsHandler::new(
                remote_name,
                address,
                cas_client,
                reader,
                tracker,
                config.limits.push_concurrency,
                config.vfs_enabled,
            );
            let result = handler.initialize().and_then(|()| dispatcher::run(&mut handler, input, output));
            (result, handler.into_tracker())
        }
        other => {
            let resolver = DaemonResolver { cas: &cas_client };
            let mut handler = NamingHandler::new(
                remote_name,
                other,
                cas_client.clone(),
                reader,
                tracker,
                &resolver,
                config.limits.push_concurrency,
                config.vfs_enabled,
            )?;
            let result = handler.initialize().and_then(|()| dispatcher::run(&mut handler, input, output));
            (result, handler.into_tracker())
        }
    };

    match (dispatch_result, tracker.close()) {
        (Err(run_err), Err(close_err)) => Err(cas::Error::ProtocolError(format!(
            "{run_err} (tracker close also failed: {close_err})"
        ))),
        (Err(run_err), Ok(())) => Err(run_err),
        (Ok(()), Err(close_err)) => Err(close_err),
        (Ok(()), Ok(())) => Ok(()),
    }
}
