pub mod time;

/// Generates a unique, url-safe identifier for executions and stored records.
pub fn longid() -> String {
    nanoid::nanoid!(21)
}
