//! Application constants

/// Maximum upload size for videos (512 MB)
pub const MAX_VIDEO_UPLOAD_SIZE: usize = 512 * 1024 * 1024;

/// Signed URL expiry time in seconds (15 minutes)
pub const SIGNED_URL_EXPIRY_SECS: u32 = 15 * 60;

/// Default page size for paginated list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum page size for paginated list endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// Longest caption any supported platform accepts (Instagram, TikTok)
pub const MAX_CAPTION_LEN: usize = 2200;
