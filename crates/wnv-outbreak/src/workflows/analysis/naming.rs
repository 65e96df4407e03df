pub const MAX_LAYER_NAME_CHARS: usize = 50;

pub fn buffer_layer_name(source: &str) -> String {
    format!("buf_{source}")
}

/// Trims, joins whitespace runs with `_` and keeps the first 50 characters.
/// Returns `fallback` when nothing is left.
pub fn sanitize_layer_name(raw: &str, fallback: &str) -> String {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join("_");
    let name: String = joined.chars().take(MAX_LAYER_NAME_CHARS).collect();
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}
