//! Transporter-side state: session identities and lifecycle, the room
//! table, and the shared id format.
//!
//! Nothing in this crate touches a socket. All mutations are expected to
//! happen on a single dispatcher task, which is what makes the tables
//! lock-free.

pub mod rooms;
pub mod session;

use rand::Rng;

const ID_CHARACTER_SEGMENT: usize = 4;
const ID_NUMERIC_SEGMENT: usize = 4;

/// How often a generator retries before declaring the id space exhausted.
pub const ID_RETRY_LIMIT: usize = 16;

/// Client and room ids share one format: four uppercase ASCII letters
/// followed by four ASCII digits, e.g. `ABCD1234`.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(ID_CHARACTER_SEGMENT + ID_NUMERIC_SEGMENT);
    for _ in 0..ID_CHARACTER_SEGMENT {
        id.push(char::from(b'A' + rng.random_range(0..26u8)));
    }
    for _ in 0..ID_NUMERIC_SEGMENT {
        id.push(char::from(b'0' + rng.random_range(0..10u8)));
    }
    id
}

/// Generate an id that is not already `taken`. Collisions are unlikely in
/// the id space but cheap to rule out; `None` after [`ID_RETRY_LIMIT`]
/// attempts means the space is effectively exhausted.
pub fn generate_id_with<F>(mut taken: F) -> Option<String>
where
    F: FnMut(&str) -> bool,
{
    for _ in 0..ID_RETRY_LIMIT {
        let id = generate_id();
        if !taken(&id) {
            return Some(id);
        }
    }
    None
}
