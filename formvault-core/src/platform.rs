//! Platform-specific paths for the local store.

use std::path::PathBuf;

/// Get the platform-specific data directory for the store
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\FormVault
/// - macOS: ~/Library/Application Support/FormVault
/// - Linux/Other: ~/.local/share/FormVault
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("FormVault")
}

/// Get the default store database path
pub fn get_default_store_path() -> PathBuf {
    get_data_dir().join("store.db")
}

/// Get the default storage key file path
///
/// Kept next to, but separate from, the database so the two resources
/// can fail independently.
pub fn get_default_key_path() -> PathBuf {
    get_data_dir().join("storage.key")
}

/// Get the default active-pointer file path
pub fn get_default_pointer_path() -> PathBuf {
    get_data_dir().join("active.json")
}

/// Ensure the data directory exists, creating it if necessary
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_data_dir() {
        let dir = get_data_dir();
        assert!(dir.to_string_lossy().ends_with("FormVault"));
    }

    #[test]
    fn test_default_paths_live_in_data_dir() {
        assert!(get_default_store_path().ends_with("store.db"));
        assert!(get_default_key_path().ends_with("storage.key"));
        assert!(get_default_pointer_path().ends_with("active.json"));
    }
}
