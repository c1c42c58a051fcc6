pub mod cookie;
pub mod extractor;

pub use cookie::SessionCookies;
pub use extractor::{cookie_header, extract_token, presence, SessionError, ACCESS_COOKIE_NAME};
