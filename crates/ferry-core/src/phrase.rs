//! Code phrase generation — dictionary words plus a short hex tail.
//!
//! Phrases only need to be easy to say over a shoulder and unlikely to
//! collide while a handful of transfers are pending.

use std::fmt::Write;

use rand::Rng;

const DICTIONARY: &[&str] = &[
    "accismus",
    "acumen",
    "aglet",
    "anachronism",
    "aphotic",
    "aplomb",
    "behove",
    "cacophony",
    "cryptic",
    "doppelganger",
    "draconian",
    "ephemeral",
    "fecund",
    "frivol",
    "gambit",
    "garrulous",
    "iconoclast",
    "impetus",
    "intrepid",
    "juggernaut",
    "juxtaposition",
    "kismet",
    "makebate",
    "mendacious",
    "mettle",
    "murmuration",
    "nastify",
    "nefarious",
    "overmorrow",
    "paragon",
    "pessimum",
    "petrichor",
    "platitude",
    "puerile",
    "redame",
    "riposte",
    "sanguine",
    "sarcast",
    "serendipity",
    "solivagant",
    "sonder",
    "syzygy",
    "tidbit",
    "vagabond",
    "yaffle",
    "zephyr",
];

/// Generate `word_count` dictionary words joined by dashes, ending with
/// three random hex digits, e.g. `petrichor-gambit-4f1`.
pub fn random_phrase(word_count: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut phrase = String::new();

    for _ in 0..word_count {
        let word = DICTIONARY[rng.gen_range(0..DICTIONARY.len())];
        phrase.push_str(word);
        phrase.push('-');
    }

    let tail: u16 = rng.gen_range(0..0x1000);
    let _ = write!(phrase, "{tail:03x}");

    phrase
}
