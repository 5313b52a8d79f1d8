//! Storage key constants.

/// Keys of the persisted session projection.
pub struct StorageKeys;

impl StorageKeys {
    /// Opaque session token (JSON string)
    pub const TOKEN: &'static str = "@jwt";

    /// Session role (JSON string)
    pub const ROLE: &'static str = "@role";

    /// User profile (JSON object)
    pub const USER: &'static str = "@user";

    /// How the token was obtained (JSON string). Optional; absent means a
    /// password session.
    pub const ORIGIN: &'static str = "@origin";

    /// The three keys a recoverable session needs.
    pub const SESSION: [&'static str; 3] = [Self::TOKEN, Self::ROLE, Self::USER];

    /// Every key the session owns; cleared together, never one at a time.
    pub const ALL: [&'static str; 4] = [Self::TOKEN, Self::ROLE, Self::USER, Self::ORIGIN];
}
