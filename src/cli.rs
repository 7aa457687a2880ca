//! Command line surface of the binary. Every command prints one JSON
//! document on success.

use bytes::Bytes;
use serde_json::json;
use uuid::Uuid;

use crate::{
    algorithm::KeyPoolAlgorithm,
    error::Error,
    keypool::{KeyPoolCreate, KeyPoolStatus, KeyPoolUpdate},
    query::{KeyPoolKeysQuery, KeyPoolsQuery},
    service::{EncryptParams, Service},
};

pub const USAGE: &str = "\
usage: keypool-kms <command>

commands:
    create <name> <algorithm> [provider]
    list
    show <pool>
    generate <pool>
    keys <pool>
    status <pool> <status>
    update <pool> <name> [description]
    delete <pool>
    encrypt <pool> <text>
    decrypt <pool> <jwe>";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create {
        name: String,
        algorithm: KeyPoolAlgorithm,
        provider: Option<String>,
    },
    List,
    Show {
        key_pool_id: Uuid,
    },
    Generate {
        key_pool_id: Uuid,
    },
    Keys {
        key_pool_id: Uuid,
    },
    Status {
        key_pool_id: Uuid,
        status: KeyPoolStatus,
    },
    Update {
        key_pool_id: Uuid,
        name: String,
        description: Option<String>,
    },
    Delete {
        key_pool_id: Uuid,
    },
    Encrypt {
        key_pool_id: Uuid,
        text: String,
    },
    Decrypt {
        key_pool_id: Uuid,
        jwe: String,
    },
}

fn pool_id(s: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(s).map_err(|e| Error::invalid_parameter(format!("invalid key pool id {s:?}: {e}")))
}

impl Command {
    /// Parses the arguments following the program name.
    pub fn parse<I, S>(args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = args.into_iter().map(Into::into).collect::<Vec<String>>();
        let args = args.iter().map(String::as_str).collect::<Vec<&str>>();

        let command = match args.as_slice() {
            ["create", name, algorithm] => Self::Create {
                name: name.to_string(),
                algorithm: KeyPoolAlgorithm::parse(algorithm)?,
                provider: None,
            },
            ["create", name, algorithm, provider] => Self::Create {
                name: name.to_string(),
                algorithm: KeyPoolAlgorithm::parse(algorithm)?,
                provider: Some(provider.to_string()),
            },
            ["list"] => Self::List,
            ["show", pool] => Self::Show {
                key_pool_id: pool_id(pool)?,
            },
            ["generate", pool] => Self::Generate {
                key_pool_id: pool_id(pool)?,
            },
            ["keys", pool] => Self::Keys {
                key_pool_id: pool_id(pool)?,
            },
            ["status", pool, status] => Self::Status {
                key_pool_id: pool_id(pool)?,
                status: status.parse().map_err(|_| {
                    Error::invalid_parameter(format!("unknown key pool status {status:?}"))
                })?,
            },
            ["update", pool, name] => Self::Update {
                key_pool_id: pool_id(pool)?,
                name: name.to_string(),
                description: None,
            },
            ["update", pool, name, description] => Self::Update {
                key_pool_id: pool_id(pool)?,
                name: name.to_string(),
                description: Some(description.to_string()),
            },
            ["delete", pool] => Self::Delete {
                key_pool_id: pool_id(pool)?,
            },
            ["encrypt", pool, text] => Self::Encrypt {
                key_pool_id: pool_id(pool)?,
                text: text.to_string(),
            },
            ["decrypt", pool, jwe] => Self::Decrypt {
                key_pool_id: pool_id(pool)?,
                jwe: jwe.to_string(),
            },
            _ => return Err(Error::invalid_parameter(USAGE)),
        };

        Ok(command)
    }

    pub async fn execute(self, service: &Service) -> Result<serde_json::Value, Error> {
        let output = match self {
            Self::Create {
                name,
                algorithm,
                provider,
            } => {
                let create = KeyPoolCreate::builder()
                    .name(name)
                    .algorithm(algorithm)
                    .maybe_provider(provider)
                    .build();
                serde_json::to_value(service.add_key_pool(create).await?)?
            }
            Self::List => {
                serde_json::to_value(service.get_key_pools(&KeyPoolsQuery::default()).await?)?
            }
            Self::Show { key_pool_id } => {
                serde_json::to_value(service.get_key_pool(key_pool_id).await?)?
            }
            Self::Generate { key_pool_id } => {
                serde_json::to_value(service.generate_key(key_pool_id).await?)?
            }
            Self::Keys { key_pool_id } => serde_json::to_value(
                service
                    .get_keys_by_key_pool(key_pool_id, &KeyPoolKeysQuery::default())
                    .await?,
            )?,
            Self::Status {
                key_pool_id,
                status,
            } => serde_json::to_value(service.update_key_pool_status(key_pool_id, status).await?)?,
            Self::Update {
                key_pool_id,
                name,
                description,
            } => {
                let update = KeyPoolUpdate::builder()
                    .name(name)
                    .maybe_description(description)
                    .build();
                serde_json::to_value(service.update_key_pool(key_pool_id, update).await?)?
            }
            Self::Delete { key_pool_id } => {
                serde_json::to_value(service.delete_key_pool(key_pool_id).await?)?
            }
            Self::Encrypt { key_pool_id, text } => {
                let jwe = service
                    .encrypt(key_pool_id, &EncryptParams::default(), Bytes::from(text))
                    .await?;
                json!({ "jwe": String::from_utf8_lossy(&jwe) })
            }
            Self::Decrypt { key_pool_id, jwe } => {
                let clear = service.decrypt(key_pool_id, Bytes::from(jwe)).await?;
                json!({ "clear": String::from_utf8_lossy(&clear) })
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        let id = Uuid::now_v7();

        assert_eq!(Command::parse(["list"]).unwrap(), Command::List);
        assert_eq!(
            Command::parse(["create", "payments", "A256GCM/A256KW"]).unwrap(),
            Command::Create {
                name: "payments".to_owned(),
                algorithm: KeyPoolAlgorithm::A256GcmA256Kw,
                provider: None,
            }
        );
        assert_eq!(
            Command::parse(["status".to_owned(), id.to_string(), "disabled".to_owned()]).unwrap(),
            Command::Status {
                key_pool_id: id,
                status: KeyPoolStatus::Disabled,
            }
        );
        assert_eq!(
            Command::parse(["update".to_owned(), id.to_string(), "renamed".to_owned()]).unwrap(),
            Command::Update {
                key_pool_id: id,
                name: "renamed".to_owned(),
                description: None,
            }
        );
        assert_eq!(
            Command::parse(["delete".to_owned(), id.to_string()]).unwrap(),
            Command::Delete { key_pool_id: id }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Command::parse(Vec::<String>::new()).is_err());
        assert!(Command::parse(["show", "not-a-uuid"]).is_err());
        assert!(matches!(
            Command::parse(["create", "p", "A1GCM/dir"]),
            Err(Error::UnsupportedAlgorithm { .. })
        ));
        assert!(Command::parse(["status", &Uuid::now_v7().to_string(), "asleep"]).is_err());
    }
}
