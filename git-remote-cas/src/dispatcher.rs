//! The line-oriented remote-helper protocol (spec.md §4.5, §7). Reads
//! commands from `input` one line at a time, batching `push`/`fetch` runs
//! up to their terminating blank line, and writes responses to `output`.

use std::io::{BufRead, Write};

use cas::error::Result;
use cas::git::Oid;

use crate::handler::Handler;

pub fn run<R: BufRead, W: Write>(handler: &mut dyn Handler, input: R, mut output: W) -> Result<()> {
    let mut lines = input.lines();

    loop {
        let Some(line) = lines.next() else { break };
        let line = line.map_err(|e| cas::Error::ProtocolError(e.to_string()))?;
        let line = line.trim_end();

        if line.is_empty() {
            continue;
        } else if line == "capabilities" {
            writeln!(output, "push")?;
            writeln!(output, "fetch")?;
            writeln!(output)?;
        } else if line == "list" || line == "list for-push" {
            let for_push = line == "list for-push";
            let refs = handler.list(for_push)?;
            for r in &refs {
                writeln!(output, "{r}")?;
            }
            writeln!(output)?;
        } else if let Some(rest) = line.strip_prefix("push ") {
            let mut results = vec![run_push(handler, rest)?];
            loop {
                match lines.next() {
                    Some(Ok(l)) if l.trim_end().is_empty() => break,
                    Some(Ok(l)) => {
                        let l = l.trim_end().to_string();
                        let Some(rest) = l.strip_prefix("push ") else {
                            return Err(cas::Error::ProtocolError(format!(
                                "expected another push command, got '{l}'"
                            )));
                        };
                        results.push(run_push(handler, rest)?);
                    }
                    Some(Err(e)) => return Err(cas::Error::ProtocolError(e.to_string())),
                    None => break,
                }
            }
            for r in &results {
                writeln!(output, "{r}")?;
            }
            writeln!(output)?;
            handler.finish()?;
        } else if let Some(rest) = line.strip_prefix("fetch ") {
            let mut wanted = vec![parse_fetch(rest)?];
            loop {
                match lines.next() {
                    Some(Ok(l)) if l.trim_end().is_empty() => break,
                    Some(Ok(l)) => {
                        let l = l.trim_end().to_string();
                        let Some(rest) = l.strip_prefix("fetch ") else {
                            return Err(cas::Error::ProtocolError(format!(
                                "expected another fetch command, got '{l}'"
                            )));
                        };
                        wanted.push(parse_fetch(rest)?);
                    }
                    Some(Err(e)) => return Err(cas::Error::ProtocolError(e.to_string())),
                    None => break,
                }
            }
            for hash in wanted {
                handler.fetch(hash)?;
            }
            writeln!(output)?;
        } else if line == "option" || line.starts_with("option ") {
            writeln!(output, "unsupported")?;
        } else {
            return Err(cas::Error::ProtocolError(format!("unknown command '{line}'")));
        }
        output.flush()?;
    }
    Ok(())
}

/// A `push <src>:<dst>` line, possibly force-pushed (`+src:dst`).
fn run_push(handler: &mut dyn Handler, rest: &str) -> Result<String> {
    let rest = rest.strip_prefix('+').unwrap_or(rest);
    let (src, dst) = rest
        .split_once(':')
        .ok_or_else(|| cas::Error::ProtocolError(format!("malformed push spec '{rest}'")))?;
    match handler.push(src, dst) {
        Ok(_) => Ok(format!("ok {dst}")),
        Err(e) => Ok(format!("error {dst} {e}")),
    }
}

fn parse_fetch(rest: &str) -> Result<Oid> {
    let hash = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| cas::Error::ProtocolError("empty fetch command".into()))?;
    hash.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use std::io::Cursor;

    struct FakeHandler {
        pushed: Vec<(String, String)>,
        fetched: Vec<Oid>,
    }

    impl Handler for FakeHandler {
        fn initialize(&mut self) -> Result<()> {
            Ok(())
        }
        fn list(&mut self, for_push: bool) -> Result<Vec<String>> {
            if for_push {
                Ok(vec![format!("{} refs/heads/master", "0".repeat(40))])
            } else {
                Ok(vec!["@refs/heads/master HEAD".to_string()])
            }
        }
        fn push(&mut self, local_ref: &str, remote_ref: &str) -> Result<String> {
            self.pushed.push((local_ref.to_string(), remote_ref.to_string()));
            Ok(local_ref.to_string())
        }
        fn fetch(&mut self, wanted: Oid) -> Result<()> {
            self.fetched.push(wanted);
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            Ok(())
        }
        fn get_remote_name(&self) -> String {
            "origin".to_string()
        }
    }

    #[test]
    fn capabilities_then_list_then_blank() {
        let mut handler = FakeHandler {
            pushed: Vec::new(),
            fetched: Vec::new(),
        };
        let input = Cursor::new(b"capabilities\nlist\n".to_vec());
        let mut output = Vec::new();
        run(&mut handler, input, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text, "push\nfetch\n\n@refs/heads/master HEAD\n\n");
    }

    #[test]
    fn push_batch_reports_ok_per_ref() {
        let mut handler = FakeHandler {
            pushed: Vec::new(),
            fetched: Vec::new(),
        };
        let input = Cursor::new(b"push refs/heads/master:refs/heads/master\n\n".to_vec());
        let mut output = Vec::new();
        run(&mut handler, input, &mut output).unwrap();
        assert_eq!(handler.pushed, vec![("refs/heads/master".to_string(), "refs/heads/master".to_string())]);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "ok refs/heads/master\n\n"
        );
    }

    #[test]
    fn fetch_batch_dispatches_every_hash() {
        let mut handler = FakeHandler {
            pushed: Vec::new(),
            fetched: Vec::new(),
        };
        let hash = cas::git::hash_of(cas::git::Kind::Blob, b"fetch-me");
        let input = Cursor::new(format!("fetch {} refs/heads/master\n\n", hash.to_hex()).into_bytes());
        let mut output = Vec::new();
        run(&mut handler, input, &mut output).unwrap();
        assert_eq!(handler.fetched, vec![hash]);
        assert_eq!(String::from_utf8(output).unwrap(), "\n");
    }
}
