//! Interactive account management.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::db::queries;
use crate::services::customer_name::normalize_customer_name;
use crate::types::{ROLE_ADMIN, ROLE_CUSTOMER, ROLE_EMPLOYEE};

const MIN_PASSWORD_LENGTH: usize = 12;

/// Prompt for a password interactively (hidden input), confirm, hash, and
/// upsert the account in the database.
pub async fn create_user_interactive(
    pool: &PgPool,
    email: &str,
    role: &str,
    customer: Option<&str>,
    name: Option<&str>,
) -> Result<()> {
    validate_email(email)?;
    let customer_name = validate_role(role, customer)?;

    let password = prompt_password()?;
    validate_password(&password)?;

    let hash = crate::auth::hash_password(&password)?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(email);

    queries::user::upsert_user(pool, email, &hash, name, role, customer_name.as_deref())
        .await
        .context("Failed to upsert user")?;

    match customer_name {
        Some(customer) => println!("{role} account ready: {email} ({customer})"),
        None => println!("{role} account ready: {email}"),
    }
    Ok(())
}

/// Startup fallback: if ADMIN_PASSWORD_HASH is set and the admin row is
/// missing or has an invalid hash, apply the pre-computed hash.
pub async fn ensure_admin_from_env(pool: &PgPool) {
    let hash = match std::env::var("ADMIN_PASSWORD_HASH") {
        Ok(h) if h.starts_with("$argon2") => h,
        _ => return,
    };

    let email = std::env::var("ADMIN_EMAIL")
        .unwrap_or_else(|_| "admin@tracker.local".to_string());

    let existing = match queries::user::get_user_by_email(pool, &email).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!("Failed to look up admin account: {e}");
            return;
        }
    };

    let needs_update = match &existing {
        None => true,
        Some(user) => user.role != ROLE_ADMIN || !user.password_hash.starts_with("$argon2"),
    };

    if !needs_update {
        return;
    }

    info!("Applying ADMIN_PASSWORD_HASH for {email}");

    let name = existing.as_ref().map(|u| u.name.as_str()).unwrap_or("Admin");
    match queries::user::upsert_user(pool, &email, &hash, name, ROLE_ADMIN, None).await {
        Ok(_) => info!("Admin account set via ADMIN_PASSWORD_HASH"),
        Err(e) => tracing::warn!("Failed to apply ADMIN_PASSWORD_HASH: {e}"),
    }
}

fn prompt_password() -> Result<String> {
    let pass = rpassword::prompt_password("Enter password: ")
        .context("Failed to read password")?;
    let confirm = rpassword::prompt_password("Confirm password: ")
        .context("Failed to read password confirmation")?;

    if pass != confirm {
        bail!("Passwords do not match");
    }
    Ok(pass)
}

fn validate_email(email: &str) -> Result<()> {
    if !email.contains('@') || !email.contains('.') {
        bail!("Invalid email address: {email}");
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        bail!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters (got {})",
            password.len()
        );
    }
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        bail!("Password must contain uppercase, lowercase, and a digit");
    }
    Ok(())
}

/// Check the role and return the normalized customer it is bound to.
fn validate_role(role: &str, customer: Option<&str>) -> Result<Option<String>> {
    let customer_name = normalize_customer_name(customer);
    match role {
        ROLE_CUSTOMER if customer_name.is_none() => {
            bail!("Customer accounts need --customer")
        }
        ROLE_CUSTOMER => Ok(customer_name),
        ROLE_ADMIN | ROLE_EMPLOYEE => {
            if customer_name.is_some() {
                bail!("--customer only applies to customer accounts");
            }
            Ok(None)
        }
        other => bail!("Unknown role: {other} (expected admin, employee or customer)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_email_passes() {
        assert!(validate_email("admin@example.com").is_ok());
    }

    #[test]
    fn invalid_email_fails() {
        assert!(validate_email("not-an-email").is_err());
    }

    #[test]
    fn short_password_rejected() {
        assert!(validate_password("Short1").is_err());
    }

    #[test]
    fn weak_password_rejected() {
        assert!(validate_password("alllowercase123").is_err());
    }

    #[test]
    fn strong_password_accepted() {
        assert!(validate_password("StrongPass123!").is_ok());
    }

    #[test]
    fn customer_role_needs_customer_name() {
        assert!(validate_role("customer", None).is_err());
        assert!(validate_role("customer", Some("  ")).is_err());
        assert_eq!(validate_role("customer", Some("vip ltd")).unwrap().as_deref(), Some("VIP"));
    }

    #[test]
    fn staff_roles_reject_customer_name() {
        assert_eq!(validate_role("employee", None).unwrap(), None);
        assert!(validate_role("admin", Some("VIP")).is_err());
    }

    #[test]
    fn unknown_role_rejected() {
        assert!(validate_role("worker", None).is_err());
    }
}
