use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use rand::Rng;

use crate::controller::error::Result;
use crate::model::layering::ResolvedDocument;
use crate::model::spec::NormalizedSpec;
use crate::platform::PlatformDefaults;
use crate::resources::common::{BuildContext, db_secret_name};

/// Keys whose empty value is replaced by a generated password
pub const PASSWORD_KEYS: [&str; 2] = ["POSTGRES_PASSWORD", "POSTGRESQL_ADMIN_PASSWORD"];

const PASSWORD_LENGTH: usize = 24;

/// Generate a secure random password
fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate the database credentials Secret.
///
/// Nothing is generated when the local database is disabled or when the CR
/// names its own credentials Secret.
pub fn build_db_secret(
    doc: &ResolvedDocument,
    spec: &NormalizedSpec,
    _platform: &PlatformDefaults,
    ctx: &BuildContext<'_>,
) -> Result<Option<Secret>> {
    if !spec.local_db.enabled || spec.local_db.auth_secret_name.is_some() {
        return Ok(None);
    }

    let mut secret: Secret = doc.parse()?;
    ctx.stamp(&mut secret.metadata, db_secret_name(&ctx.cr_name()), "database");
    if secret.type_.is_none() {
        secret.type_ = Some("Opaque".to_string());
    }
    Ok(Some(secret))
}

/// Fill every empty password key with a random value.
///
/// Applied only when the Secret is first created, so the password is stable.
pub fn fill_generated_passwords(secret: &mut Secret) {
    let string_data = secret.string_data.get_or_insert_with(BTreeMap::new);
    let password = generate_password(PASSWORD_LENGTH);
    for key in PASSWORD_KEYS {
        let already_in_data = secret
            .data
            .as_ref()
            .is_some_and(|data| data.get(key).is_some_and(|v| !v.0.is_empty()));
        if already_in_data {
            continue;
        }
        let value = string_data.entry(key.to_string()).or_default();
        if value.is_empty() {
            *value = password.clone();
        }
    }
}
