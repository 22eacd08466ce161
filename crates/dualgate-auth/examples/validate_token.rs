//! Validate a bearer token from the command line
//!
//! ```bash
//! export DUALGATE_TENANT_ID=contoso
//! export DUALGATE_CLIENT_ID=api-client-id
//! cargo run --example validate_token -- <issuer> <audience> <token>
//! ```

use dualgate_auth::jwt::{KeySetCache, TokenValidator};
use dualgate_auth::{KeySetCacheConfig, ValidationSettings};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(issuer), Some(audience), Some(token)) = (args.next(), args.next(), args.next())
    else {
        eprintln!("usage: validate_token <issuer> <audience> <token>");
        std::process::exit(2);
    };

    let settings = ValidationSettings::from_env()?;
    let cache = Arc::new(KeySetCache::new(KeySetCacheConfig::default())?);
    let validator = TokenValidator::new(Arc::clone(&cache));

    match validator.validate(&token, &issuer, &audience, &settings).await {
        Some(principal) => {
            println!("issuer:  {}", principal.issuer);
            println!("subject: {}", principal.subject().unwrap_or("-"));
            if let Some(actor) = &principal.actor {
                println!(
                    "acting for {} ({})",
                    actor.subject.as_deref().unwrap_or("-"),
                    actor.issuer
                );
            }
            for (claim_type, value) in principal.claims.iter() {
                println!("  {claim_type} = {value}");
            }
        }
        None => {
            println!("token rejected");
            std::process::exit(1);
        }
    }

    let stats = cache.stats();
    println!("jwks fetches: {}, failures: {}", stats.fetches, stats.fetch_failures);
    Ok(())
}
