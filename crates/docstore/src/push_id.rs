//! Chronologically ordered push ids.
//!
//! A push id is 20 characters: 8 encode the creation time in milliseconds,
//! 12 are random. Ids generated within the same millisecond increment the
//! random part, so lexicographic order always follows creation order.

use parking_lot::Mutex;
use rand::Rng;

/// Alphabet in ascending ASCII order
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
/// Number of characters encoding the timestamp
const TIME_CHARS: usize = 8;
/// Number of random characters
const RANDOM_CHARS: usize = 12;
/// Total push id length
pub const PUSH_ID_LENGTH: usize = TIME_CHARS + RANDOM_CHARS;

struct State {
    last_time: i64,
    last_random: [u8; RANDOM_CHARS],
}

/// Push id generator; shared by all writers of a store
pub struct PushIdGenerator {
    state: Mutex<State>,
}

impl Default for PushIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                last_time: 0,
                last_random: [0; RANDOM_CHARS],
            }),
        }
    }

    /// Generate an id for the current time
    pub fn next_id(&self) -> String {
        self.next_id_at(chrono::Utc::now().timestamp_millis())
    }

    /// Generate an id for the given time in milliseconds
    pub fn next_id_at(&self, now: i64) -> String {
        let mut state = self.state.lock();

        if now == state.last_time {
            // Same millisecond: increment the previous random part
            for digit in state.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.random_range(0..64);
            }
            state.last_time = now;
        }

        let mut id = String::with_capacity(PUSH_ID_LENGTH);

        let mut time_chars = [0u8; TIME_CHARS];
        let mut remaining = now.max(0);
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(
            state
                .last_random
                .iter()
                .map(|&digit| PUSH_CHARS[digit as usize] as char),
        );

        id
    }
}
