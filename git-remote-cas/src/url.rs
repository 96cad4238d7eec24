//! Minimal parsing of the remote URL schemes recognized by the dispatcher
//! (spec.md §6). The dispatcher is the only thing that understands these
//! schemes; the engines never see a `RemoteUrl`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUrl {
    /// `ipfs://<address>`, address possibly empty.
    Ipfs { address: String },
    /// `ipns://<name>`.
    Ipns { name: String },
    /// `key:<local-key>`.
    Key { local_key: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("unrecognized remote url scheme: '{0}'")]
    UnknownScheme(String),
}

pub fn parse(url: &str) -> Result<RemoteUrl, ParseError> {
    if let Some(rest) = url.strip_prefix("ipfs://") {
        Ok(RemoteUrl::Ipfs {
            address: rest.to_string(),
        })
    } else if let Some(rest) = url.strip_prefix("ipns://") {
        Ok(RemoteUrl::Ipns {
            name: rest.to_string(),
        })
    } else if let Some(rest) = url.strip_prefix("key:") {
        Ok(RemoteUrl::Key {
            local_key: rest.to_string(),
        })
    } else {
        Err(ParseError::UnknownScheme(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipfs_url_with_empty_authority() {
        assert_eq!(
            parse("ipfs://").unwrap(),
            RemoteUrl::Ipfs {
                address: String::new()
            }
        );
    }

    #[test]
    fn parses_key_scheme() {
        assert_eq!(
            parse("key:mykey").unwrap(),
            RemoteUrl::Key {
                local_key: "mykey".to_string()
            }
        );
    }
}
