/// Peer-manager command surface
///
/// Thin frontend over the authorized-peers wallet: show our identity key,
/// list known peers, register new peer keys. Server and client sides keep
/// separate peer databases under the data directory.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::crypto::KdfRomix;
use crate::wallet::core::{AuthorizedPeers, CreateParams};

const SERVER_DB: &str = "server.peers";
const CLIENT_DB: &str = "client.peers";

#[derive(Parser, Debug)]
#[command(name = "peer-manager")]
#[command(about = "Manage authorized peer keys for the encrypted handshake")]
pub struct PeerManagerArgs {
    /// Data directory holding the peer databases
    #[arg(long, default_value = ".armory-vault")]
    pub datadir: PathBuf,

    /// Operate on the server-side peer database
    #[arg(long, conflicts_with = "client")]
    pub server: bool,

    /// Operate on the client-side peer database
    #[arg(long, conflicts_with = "server")]
    pub client: bool,

    /// Print our own identity public key
    #[arg(long)]
    pub show_my_key: bool,

    /// Print every known peer key
    #[arg(long)]
    pub show_keys: bool,

    /// Register a peer key: <hex pubkey> <name>...
    #[arg(long, num_args = 2.., value_name = "KEY_AND_NAMES")]
    pub add_key: Option<Vec<String>>,
}

pub fn run(args: PeerManagerArgs) -> Result<()> {
    if args.server == args.client {
        bail!("exactly one of --server or --client is required");
    }
    let db_name = if args.server { SERVER_DB } else { CLIENT_DB };
    let db_path = args.datadir.join(db_name);

    let mut peers = if db_path.exists() {
        AuthorizedPeers::open(&db_path).context("opening peer database")?
    } else {
        std::fs::create_dir_all(&args.datadir).context("creating data directory")?;
        let params = CreateParams {
            passphrase: None,
            lookup: 2,
            kdf: Some(
                KdfRomix::new().context("calibrating key derivation parameters")?,
            ),
        };
        AuthorizedPeers::create(&db_path, params).context("creating peer database")?
    };

    if args.show_my_key {
        let own = peers.own_public_key().context("reading identity key")?;
        println!("{}", hex::encode(own));
    }

    if args.show_keys {
        let projection = peers.projection();
        for (name, pubkey) in &projection.name_map {
            println!("{name}: {}", hex::encode(pubkey));
        }
    }

    if let Some(key_and_names) = &args.add_key {
        let pubkey = hex::decode(&key_and_names[0]).context("decoding peer public key hex")?;
        let names: Vec<String> = key_and_names[1..].to_vec();
        peers
            .add_peer(&pubkey, &names)
            .context("registering peer key")?;
        println!("added {} name(s) for {}", names.len(), &key_and_names[0]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_server_and_client_conflict() {
        let result =
            PeerManagerArgs::try_parse_from(["peer-manager", "--server", "--client"]);
        assert_eq!(
            result.unwrap_err().kind(),
            ErrorKind::ArgumentConflict
        );
    }

    #[test]
    fn test_add_key_needs_name() {
        let result =
            PeerManagerArgs::try_parse_from(["peer-manager", "--server", "--add-key", "02ab"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parses_full_surface() {
        let args = PeerManagerArgs::try_parse_from([
            "peer-manager",
            "--datadir=/tmp/peers",
            "--client",
            "--show-my-key",
            "--show-keys",
            "--add-key",
            "02ab",
            "alice",
            "alice.local",
        ])
        .unwrap();
        assert!(args.client);
        assert!(args.show_my_key);
        assert_eq!(args.add_key.unwrap().len(), 3);
    }
}
