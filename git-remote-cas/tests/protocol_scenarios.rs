//! End-to-end dispatcher scenarios against a fake handler, matching the
//! literal transcripts a remote-helper session produces.

use std::io::Cursor;

use cas::error::Result;
use cas::git::Oid;
use git_remote_cas::dispatcher;
use git_remote_cas::handler::Handler;

struct FixtureHandler {
    remote_refs: Vec<String>,
    local_branches: Vec<&'static str>,
}

impl Handler for FixtureHandler {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn list(&mut self, for_push: bool) -> Result<Vec<String>> {
        if for_push {
            Ok(self
                .local_branches
                .iter()
                .map(|b| format!("{} {b}", "0".repeat(40)))
                .collect())
        } else {
            Ok(self.remote_refs.clone())
        }
    }

    fn push(&mut self, local_ref: &str, _remote_ref: &str) -> Result<String> {
        Ok(local_ref.to_string())
    }

    fn fetch(&mut self, _wanted: Oid) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_remote_name(&self) -> String {
        "origin".to_string()
    }
}

fn run_session(handler: &mut dyn Handler, commands: &str) -> String {
    let input = Cursor::new(commands.as_bytes().to_vec());
    let mut output = Vec::new();
    dispatcher::run(handler, input, &mut output).unwrap();
    String::from_utf8(output).unwrap()
}

#[test]
fn capabilities_lists_push_and_fetch() {
    let mut handler = FixtureHandler {
        remote_refs: vec![],
        local_branches: vec![],
    };
    assert_eq!(run_session(&mut handler, "capabilities\n"), "push\nfetch\n\n");
}

#[test]
fn list_reports_head_then_the_known_ref() {
    let mut handler = FixtureHandler {
        remote_refs: vec![
            "@refs/heads/master HEAD".to_string(),
            "d5b0d08c180fd7a9bf4f684a37e60ceeb4d25ec8 refs/heads/master".to_string(),
        ],
        local_branches: vec![],
    };
    assert_eq!(
        run_session(&mut handler, "list\n"),
        "@refs/heads/master HEAD\nd5b0d08c180fd7a9bf4f684a37e60ceeb4d25ec8 refs/heads/master\n\n"
    );
}

#[test]
fn list_for_push_reports_all_zeros_per_local_branch() {
    let mut handler = FixtureHandler {
        remote_refs: vec![],
        local_branches: vec!["refs/heads/french", "refs/heads/italian", "refs/heads/master"],
    };
    assert_eq!(
        run_session(&mut handler, "list for-push\n"),
        concat!(
            "0000000000000000000000000000000000000000 refs/heads/french\n",
            "0000000000000000000000000000000000000000 refs/heads/italian\n",
            "0000000000000000000000000000000000000000 refs/heads/master\n",
            "\n",
        )
    );
}

#[test]
fn push_batch_of_one_reports_ok_and_runs_finish() {
    let mut handler = FixtureHandler {
        remote_refs: vec![],
        local_branches: vec![],
    };
    assert_eq!(
        run_session(&mut handler, "push refs/heads/master:refs/heads/master\n\n"),
        "ok refs/heads/master\n\n"
    );
}
