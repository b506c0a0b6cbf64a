use serenity::model::id::{ChannelId, UserId};
use std::sync::Arc;
use tracing::debug;

use crate::audio::sound::{Sound, SoundCollection};

/// Words that show the command list.
const HELP_COMMANDS: [&str; 3] = ["!help", "!commands", "!h"];

/// A chat message worth looking at, lower-cased and split on spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Starts with `!`.
    Prefixed(Vec<String>),
    /// Mentions someone; only the owner mentioning the bot gets an answer.
    Mention(Vec<String>),
}

/// Classifies a message. Anything that neither starts with `!` nor carries
/// exactly one mention is ignored.
pub fn classify(content: &str, mentions: usize) -> Option<Invocation> {
    if content.is_empty() || (!content.starts_with('!') && mentions != 1) {
        return None;
    }

    let parts: Vec<String> = content.to_lowercase().split(' ').map(str::to_string).collect();

    if mentions > 0 {
        Some(Invocation::Mention(parts))
    } else {
        Some(Invocation::Prefixed(parts))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Stats,
    Status,
    Aps,
}

impl ControlCommand {
    /// The last word of an owner mention selects the command.
    pub fn parse(parts: &[String]) -> Option<Self> {
        match parts.last()?.as_str() {
            "stats" => Some(Self::Stats),
            "status" => Some(Self::Status),
            "aps" => Some(Self::Aps),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Help,
    Play {
        collection: Arc<SoundCollection>,
        /// Sound named after the command; `None` draws one at random.
        sound: Option<Arc<Sound>>,
    },
}

/// Resolves a prefixed message against the catalog.
///
/// A second word forces that sound; an unknown name resolves to nothing.
pub fn parse_command(parts: &[String], collections: &[Arc<SoundCollection>]) -> Option<Command> {
    let command = parts.first()?.as_str();

    if HELP_COMMANDS.contains(&command) {
        return Some(Command::Help);
    }

    let collection = collections.iter().find(|c| c.matches(command))?;

    let sound = match parts.get(1) {
        Some(name) => match collection.find(name) {
            Some(sound) => Some(sound.clone()),
            None => {
                debug!(command, sound = %name, "Sonido desconocido, nada que reproducir");
                return None;
            }
        },
        None => None,
    };

    Some(Command::Play {
        collection: collection.clone(),
        sound,
    })
}

/// Lists every command, plus the named variants of multi-sound collections.
pub fn help_text(collections: &[Arc<SoundCollection>]) -> String {
    let mut commands = Vec::new();

    for collection in collections {
        let advertised = collection.trigger().advertised();
        let Some(primary) = advertised.first() else {
            continue;
        };

        commands.push(primary.to_string());
        if collection.sounds().len() > 1 {
            commands.extend(
                collection
                    .sounds()
                    .iter()
                    .map(|sound| format!("{} {}", primary, sound.name())),
            );
        }
    }

    format!("`List of commands:`\n\n`{}`", commands.join(" "))
}

/// Finds the voice channel `user` is connected to among a guild's voice states.
pub fn find_voice_channel<I>(voice_states: I, user: UserId) -> Option<ChannelId>
where
    I: IntoIterator<Item = (UserId, Option<ChannelId>)>,
{
    voice_states
        .into_iter()
        .find(|(id, _)| *id == user)
        .and_then(|(_, channel)| channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use pretty_assertions::assert_eq;

    fn words(content: &str) -> Vec<String> {
        match classify(content, 0) {
            Some(Invocation::Prefixed(parts)) => parts,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_messages() {
        assert_eq!(classify("", 0), None);
        assert_eq!(classify("hello there", 0), None);
        assert_eq!(classify("hello <@1> <@2>", 2), None);
        assert_eq!(
            classify("!AirHorn Fourtap", 0),
            Some(Invocation::Prefixed(vec!["!airhorn".into(), "fourtap".into()]))
        );
        assert_eq!(
            classify("<@1> STATS", 1),
            Some(Invocation::Mention(vec!["<@1>".into(), "stats".into()]))
        );
        // Un "!" con menciones sigue siendo una mención
        assert!(matches!(classify("!airhorn <@1>", 1), Some(Invocation::Mention(_))));
    }

    #[test]
    fn control_commands_use_last_word() {
        assert_eq!(ControlCommand::parse(&words("!x stats")), Some(ControlCommand::Stats));
        assert_eq!(ControlCommand::parse(&words("!x status")), Some(ControlCommand::Status));
        assert_eq!(ControlCommand::parse(&words("!x aps")), Some(ControlCommand::Aps));
        assert_eq!(ControlCommand::parse(&words("!x stats please")), None);
    }

    #[test]
    fn help_aliases() {
        let collections = catalog::collections().unwrap();
        for alias in ["!help", "!commands", "!h"] {
            assert!(matches!(parse_command(&words(alias), &collections), Some(Command::Help)));
        }
    }

    #[test]
    fn forced_and_random_sounds() {
        let collections = catalog::collections().unwrap();

        match parse_command(&words("!airhorn fourtap"), &collections) {
            Some(Command::Play { collection, sound }) => {
                assert_eq!(collection.prefix(), "airhorn");
                assert_eq!(sound.unwrap().name(), "fourtap");
            }
            other => panic!("unexpected {other:?}"),
        }

        match parse_command(&words("!eb"), &collections) {
            Some(Command::Play { collection, sound }) => {
                assert_eq!(collection.prefix(), "ethan");
                assert!(sound.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_sound_or_command_plays_nothing() {
        let collections = catalog::collections().unwrap();
        assert!(parse_command(&words("!airhorn nope"), &collections).is_none());
        assert!(parse_command(&words("!nothing"), &collections).is_none());
    }

    #[test]
    fn help_lists_named_variants() {
        let collections = catalog::collections().unwrap();
        let help = help_text(&collections);
        assert!(help.starts_with("`List of commands:`"));
        assert!(help.contains("!airhorn fourtap"));
        assert!(help.contains("!sheeit"));
        assert!(help.contains("!anotha one_classic"));
    }

    #[test]
    fn voice_channel_of_author() {
        let states = vec![
            (UserId::new(1), Some(ChannelId::new(10))),
            (UserId::new(2), None),
            (UserId::new(3), Some(ChannelId::new(30))),
        ];
        assert_eq!(find_voice_channel(states.clone(), UserId::new(3)), Some(ChannelId::new(30)));
        assert_eq!(find_voice_channel(states.clone(), UserId::new(2)), None);
        assert_eq!(find_voice_channel(states, UserId::new(4)), None);
    }
}
