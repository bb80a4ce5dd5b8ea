//! Syncer entrypoint arguments (spec.md §6).

use clap::Parser;

/// `rlguard-syncer` accepts a single positional argument selecting the
/// shared-state backend: `zookeeper` for the coordination-service
/// backend (etcd), anything else — or nothing — for the default
/// networked hash-store backend (Redis).
#[derive(Parser, Debug)]
#[command(
    name = "rlguard-syncer",
    version,
    about = "Refill scheduler for the rlguard distributed rate-limiting coordinator"
)]
pub struct Cli {
    /// Backend selector: `zookeeper` for the coordination-service
    /// backend, omitted or any other value for the hash-store backend.
    pub backend: Option<String>,
}

impl Cli {
    pub fn use_coordination_backend(&self) -> bool {
        self.backend.as_deref() == Some("zookeeper")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn zookeeper_arg_selects_coordination_backend() {
        let cli = Cli {
            backend: Some("zookeeper".into()),
        };
        assert!(cli.use_coordination_backend());
    }

    #[test]
    fn absent_arg_selects_hash_store_backend() {
        let cli = Cli { backend: None };
        assert!(!cli.use_coordination_backend());
    }

    #[test]
    fn unknown_arg_falls_back_to_hash_store_backend() {
        let cli = Cli {
            backend: Some("postgres".into()),
        };
        assert!(!cli.use_coordination_backend());
    }
}
