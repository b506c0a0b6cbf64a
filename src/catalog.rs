//! Sound collections shipped with the bot.
//!
//! Files live in `AUDIO_DIR` as `<prefix>_<name>.wav`.

use anyhow::Result;
use std::sync::Arc;

use crate::audio::sound::{Sound, SoundCollection, TriggerMatcher, DEFAULT_PART_DELAY};

fn sound(name: &str, weight: u32) -> Sound {
    Sound::new(name, weight, DEFAULT_PART_DELAY)
}

fn single(prefix: &str, commands: &[&str], name: &str, weight: u32) -> Arc<SoundCollection> {
    Arc::new(SoundCollection::new(
        prefix,
        TriggerMatcher::exact(commands.iter().copied()),
        vec![sound(name, weight)],
    ))
}

/// Builds every collection. `!anotha` chains into `!airhorn`.
pub fn collections() -> Result<Vec<Arc<SoundCollection>>> {
    let airhorn = Arc::new(SoundCollection::new(
        "airhorn",
        TriggerMatcher::exact(["!airhorn"]),
        vec![sound("default", 1000), sound("fourtap", 800)],
    ));

    let anotha = Arc::new(
        SoundCollection::new(
            "another",
            TriggerMatcher::exact(["!anotha", "!anothaone"]),
            vec![sound("one", 1), sound("one_classic", 1)],
        )
        .chained_with(airhorn.clone()),
    );

    let wow = Arc::new(SoundCollection::new(
        "misc",
        TriggerMatcher::exact(["!wow"]),
        vec![sound("wow", 100), sound("waow", 100)],
    ));

    let sheeit = Arc::new(SoundCollection::new(
        "misc",
        TriggerMatcher::pattern("^!shee+it$", "!sheeit")?,
        vec![sound("sheeit", 100)],
    ));

    Ok(vec![
        single("TSM", &["!fuckedup"], "fuckedup", 1),
        airhorn,
        anotha,
        single("ethan", &["!ethan", "!eb"], "classic", 100),
        single("lol", &["!doublelift", "!dl"], "doublelift", 100),
        single("lol", &["!penta", "!pentakirr"], "pentakirr", 1000),
        wow,
        single("misc", &["!triple"], "triple", 100),
        single("misc", &["!noice", "!nice"], "noice", 100),
        single("misc", &["!tobi", "!never"], "never", 100),
        single("misc", &["!chocolate", "!choco"], "chocolate", 100),
        single("misc", &["!profanity"], "profanity", 100),
        single("misc", &["!cry"], "cry", 100),
        single("misc", &["!lol"], "hot", 100),
        single("misc", &["!mad", "!game"], "onlygame", 100),
        sheeit,
        single("TSM", &["!tsm", "!bestteam"], "TSM", 1),
        single("TSM", &["!ohmygod", "!omg"], "ohgod", 1),
        single("TSM", &["!hello"], "hello", 1),
        single("TSM", &["!rero", "!cherry"], "cherry", 1),
        single("TSM", &["!believe", "!cantbelieve", "!cb"], "cantbelieve", 1),
        single("TSM", &["!doit", "!justdoit"], "justdoit", 1),
        single("TSM", &["!how", "!happentome"], "howcouldthis", 1),
        single("TSM", &["!frick"], "frick", 1),
        single("TSM", &["!whenwillyoulearn", "!wwyl"], "whenwilllearn", 1),
        single("TSM", &["!evennow", "!even"], "evennow", 1),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn commands_are_lowercase_and_unique() {
        let collections = collections().unwrap();
        let mut seen = HashSet::new();
        for collection in &collections {
            for command in collection.trigger().advertised() {
                assert_eq!(command, command.to_lowercase());
                assert!(seen.insert(command.to_string()), "duplicated {command}");
            }
        }
    }

    #[test]
    fn anotha_chains_into_airhorn() {
        let collections = collections().unwrap();
        let anotha = collections.iter().find(|c| c.matches("!anotha")).unwrap();
        let chained = anotha.chain_with().unwrap();
        assert!(chained.matches("!airhorn"));
        assert!(chained.chain_with().is_none());
    }

    #[test]
    fn sheeit_needs_two_or_more_e() {
        let collections = collections().unwrap();
        let sheeit = collections.iter().find(|c| c.matches("!sheeeeit")).unwrap();
        assert_eq!(sheeit.sounds()[0].name(), "sheeit");
        // Al menos dos "e"
        assert!(!collections.iter().any(|c| c.matches("!sheit")));
    }
}
