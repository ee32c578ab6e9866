//! Room link generation

use rand::Rng;

use crate::constants::{LINK_BODY_LENGTH, LINK_LENGTH, LINK_PREFIX, LINK_SYMBOLS};

/// Generate an unguessable room link: the fixed prefix followed by
/// letters drawn uniformly from both cases of the alphabet.
pub fn generate_link() -> String {
    let mut rng = rand::thread_rng();
    let mut link = String::with_capacity(LINK_LENGTH);
    link.push_str(LINK_PREFIX);

    for _ in 0..LINK_BODY_LENGTH {
        let symbol = LINK_SYMBOLS[rng.gen_range(0..LINK_SYMBOLS.len())];
        link.push(symbol as char);
    }

    link
}

/// Whether `link` has the shape of a generated link
pub fn is_well_formed(link: &str) -> bool {
    link.len() == LINK_LENGTH
        && link.starts_with(LINK_PREFIX)
        && link[LINK_PREFIX.len()..]
            .bytes()
            .all(|b| LINK_SYMBOLS.contains(&b))
}
