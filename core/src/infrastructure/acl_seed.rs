// Copyright (c) 2026 Isprava Engineering
//! YAML loader for the initial [`AclConfig`] seed (`spec.md` SS6
//! "Environment contract": "a path to the ACL seed file").

use std::path::Path;

use crate::domain::acl::AclConfig;

#[derive(Debug, thiserror::Error)]
pub enum AclSeedError {
    #[error("failed to read acl seed file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse acl seed file {path}: {source}")]
    Parse { path: String, source: serde_yaml::Error },
}

pub fn load_seed(path: impl AsRef<Path>) -> Result<AclConfig, AclSeedError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| AclSeedError::Read {
        path: path.display().to_string(),
        source,
    })?;

    serde_yaml::from_str(&raw).map_err(|source| AclSeedError::Parse {
        path: path.display().to_string(),
        source,
    })
}
