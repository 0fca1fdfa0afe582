// Name and version baked in at build time; shown on `/`, `/version` and the sample stream.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NAME: &str = env!("CARGO_PKG_NAME");

/// `"<name> <version>"`, the plain-text body of `GET /`.
pub fn banner() -> String {
    format!("{} {}", NAME, VERSION)
}
