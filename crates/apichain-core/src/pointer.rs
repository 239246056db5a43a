//! JSON pointer helpers (RFC 6901 escaping).

pub const ROOT_POINTER: &str = "/";

/// Escapes a single pointer segment: `~` becomes `~0`, `/` becomes `~1`.
pub fn encode_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Reverses [`encode_pointer`].
pub fn decode_pointer(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Appends `segment` to `base`, producing a pointer such as `/data/id`.
pub fn join_pointer(base: &str, segment: &str) -> String {
    let mut pointer = base.to_string();
    if !pointer.ends_with('/') {
        pointer.push('/');
    }
    pointer.push_str(&encode_pointer(segment));
    pointer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_path_templates() {
        assert_eq!(encode_pointer("/users/{id}"), "~1users~1{id}");
        assert_eq!(decode_pointer("~1users~1{id}"), "/users/{id}");
    }

    #[test]
    fn tilde_roundtrip() {
        assert_eq!(decode_pointer(&encode_pointer("a~/b")), "a~/b");
    }

    #[test]
    fn join_from_root() {
        assert_eq!(join_pointer(ROOT_POINTER, "id"), "/id");
        assert_eq!(join_pointer("/data", "a/b"), "/data/a~1b");
    }
}
