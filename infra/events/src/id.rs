//! Identifier generation for events and subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;

// Alphabet excludes visually ambiguous characters (I, O, l, 0, 1).
pub(crate) const SAFE_ALPHABET: &[char; 55] = &[
    '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L',
    'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f',
    'g', 'h', 'j', 'k', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

const ID_LENGTH: usize = 16;

fn safe_nanoid(prefix: &str) -> String {
    let mut id = String::with_capacity(prefix.len() + ID_LENGTH);
    id.push_str(prefix);
    id.push_str(&nanoid::nanoid!(ID_LENGTH, SAFE_ALPHABET));
    id
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub(crate) fn generate() -> Self {
                Self(safe_nanoid($prefix))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

prefixed_id!(
    /// Globally unique event identifier, assigned at creation.
    EventId,
    "evt_"
);

prefixed_id!(
    /// Identifier handed out by `subscribe*` and accepted by `unsubscribe`.
    SubscriberId,
    "sub_"
);

#[cfg(test)]
mod tests {
    use super::*;
    use fxhash::FxHashSet;

    #[test]
    fn ids_use_prefix_and_safe_charset() {
        let id = EventId::generate();
        let body = id.as_str().strip_prefix("evt_").expect("event prefix");
        assert_eq!(body.len(), ID_LENGTH);
        for ch in body.chars() {
            assert!(SAFE_ALPHABET.contains(&ch), "unexpected character in id: {ch}");
        }
        assert!(SubscriberId::generate().as_str().starts_with("sub_"));
    }

    #[test]
    fn ids_do_not_collide() {
        let ids: FxHashSet<_> = (0..10_000).map(|_| EventId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
