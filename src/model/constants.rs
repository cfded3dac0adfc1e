pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_FPS: u32 = 8;
pub const DEFAULT_MAX_FRAMES: u32 = 20;

/// Largest frame count a session may be configured with.
pub const MAX_FRAMES_LIMIT: u32 = 1_000;

/// Upper bound on records kept per frame unless configured otherwise.
pub const DEFAULT_MAX_PATHS_PER_FRAME: usize = 10_000;

/// Close code sent to every connection when the session token rotates (policy violation).
pub const SESSION_CHANGED_CLOSE_CODE: u16 = 1008;
pub const SESSION_CHANGED_REASON: &str = "Session Key Changed";
pub const SESSION_CHANGED_NOTICE: &str = "Session key changed. Disconnecting.";

pub const DEFAULT_NODE_ID: &str = "SERVER_A";
pub const DEFAULT_CENTRAL_URL: &str = "ws://localhost:8090";

/// Number of characters of a relayed message shown in debug logs.
pub const LOG_PREVIEW_CHARS: usize = 50;

/// Number of characters of a token echoed back to an operator.
pub const TOKEN_PREVIEW_CHARS: usize = 8;

/// Cuts `text` to at most `max` characters without splitting a code point.
pub fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_text_is_untouched() {
        assert_eq!(preview("abc", 8), "abc");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("ääää", 2), "ää");
        assert_eq!(preview("0123456789", 4), "0123");
    }
}
