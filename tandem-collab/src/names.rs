//! Silly session names for participants who skip the login prompt.

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "Brave", "Calm", "Clever", "Curious", "Dapper", "Eager", "Fuzzy", "Gentle", "Giddy", "Humble",
    "Jolly", "Keen", "Lucky", "Mellow", "Nimble", "Plucky", "Quiet", "Rapid", "Sly", "Snazzy",
    "Spry", "Sturdy", "Swift", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Bison", "Crane", "Dingo", "Falcon", "Ferret", "Gecko", "Heron", "Ibex", "Jackal",
    "Koala", "Lemur", "Lynx", "Marmot", "Marten", "Newt", "Otter", "Panda", "Puffin", "Quokka",
    "Raven", "Stoat", "Walrus", "Wombat",
];

/// A random adjective-animal pair, e.g. `BraveOtter`.
pub fn silly_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Swift");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Otter");
    format!("{adjective}{animal}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silly_name_shape() {
        let name = silly_name();
        assert!(!name.is_empty());
        assert!(name.chars().next().unwrap().is_ascii_uppercase());
        // Exactly two capitalized words glued together.
        assert_eq!(name.chars().filter(|c| c.is_ascii_uppercase()).count(), 2);
    }
}
