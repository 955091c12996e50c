//! `lookout jwt`: mint a signed RS256 bearer token for local development.

use lookout_api::auth::jwt::sign_token;
use uuid::Uuid;

use super::CommandError;

pub fn run(subject: Uuid, ttl_secs: i64) -> Result<(), CommandError> {
    let private_key = std::env::var("LOOKOUT_JWT_PRIVATE_KEY_PEM")
        .map_err(|_| "LOOKOUT_JWT_PRIVATE_KEY_PEM must be set")?;

    let token = sign_token(&private_key, subject, chrono::Duration::seconds(ttl_secs))?;
    println!("{token}");

    Ok(())
}
