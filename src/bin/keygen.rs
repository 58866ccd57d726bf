//! Node identity generator.
//!
//! Writes the 32-byte Curve25519 secret as hex and prints the `pp_` form
//! of the public key, which other operators need to dial this node.

use aewatch::ids::{self, IdTag};
use aewatch::Keypair;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keygen", version, about = "Generate a node identity keypair")]
struct Args {
    /// Output file for the hex-encoded secret key
    #[arg(short, long, default_value = "node_key")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();

    let keypair = Keypair::generate();

    fs::write(&args.output, hex::encode(keypair.secret_bytes()))
        .expect("failed to write secret key");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&args.output)
            .expect("failed to stat key file")
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&args.output, perms).expect("failed to restrict key file");
    }

    println!("secret key written to {}", args.output.display());
    println!("node address: {}", ids::encode(IdTag::PeerPubkey, &keypair.public));
    println!();
    println!("Keep the secret file private; share only the pp_ address.");
}
