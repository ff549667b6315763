use ethers::signers::LocalWallet;
use perp_guard_core::GatewayError;
use std::path::Path;
use std::str::FromStr;

/// Create wallet from private key (with or without 0x prefix)
///
/// # Errors
/// Returns error if private key format is invalid
pub fn create_wallet_from_private_key(private_key: &str) -> Result<LocalWallet, GatewayError> {
    let key = private_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);

    LocalWallet::from_str(key)
        .map_err(|e| GatewayError::Auth(format!("invalid private key: {e}")))
}

/// Load the API wallet from a credential file holding one hex private key.
///
/// # Errors
/// Returns error if the file is unreadable or does not hold a valid key
pub fn load_wallet(path: &Path) -> Result<LocalWallet, GatewayError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::Auth(format!("cannot read credential file {}: {e}", path.display()))
    })?;
    create_wallet_from_private_key(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use std::io::Write;

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn loads_key_from_file_with_prefix_and_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0x{KEY}").unwrap();

        let wallet = load_wallet(file.path()).unwrap();
        let direct = create_wallet_from_private_key(KEY).unwrap();
        assert_eq!(wallet.address(), direct.address());
    }

    #[test]
    fn missing_file_is_auth_error() {
        let err = load_wallet(Path::new("/nonexistent/perp-guard.key")).unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn garbage_key_is_rejected() {
        assert!(matches!(
            create_wallet_from_private_key("not-a-key"),
            Err(GatewayError::Auth(_))
        ));
    }
}
