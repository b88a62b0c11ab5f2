//! Creates an account row and prints its opaque auth key.

use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use clap::Parser;
use rand::RngCore;

use statrelay_server::store::UserStore;

/// Create a statrelay user and bind a fresh auth key to it.
#[derive(Parser, Debug)]
#[command(name = "create-user")]
#[command(about = "Create a statrelay user and auth key")]
struct Args {
    /// User database path
    #[arg(long, default_value = "data/statrelay-users.db")]
    db_path: PathBuf,

    /// Concurrent subscriber slots for the new user
    #[arg(long, default_value = "4")]
    max_subscribers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let store = UserStore::open(&args.db_path)?;
    let user = store.create_user(args.max_subscribers)?;

    let mut raw = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let auth_key = URL_SAFE_NO_PAD.encode(raw);
    store.upsert_auth_key(auth_key.as_bytes(), user.user_id)?;

    println!("user_id: {}", user.user_id);
    println!("max_subscribers: {}", user.max_subscribers);
    println!("auth_key: {auth_key}");
    Ok(())
}
