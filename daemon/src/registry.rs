//! Command registry
//!
//! Maps a transcript or a gesture to a named action. Voice matching is a
//! flat, ordered list of trigger sets: the first set with any phrase
//! contained in the normalized transcript wins, so narrower commands must
//! be listed before broader ones. Gestures map 1:1.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::gesture::Gesture;

/// Configured name of an action
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an action does once it holds the single-flight token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Run the capture/upload pipeline
    Capture,
    /// Confirm, then hand the user over to another host screen
    Handoff { confirmation: String },
    /// Speak the intro again and keep listening
    RepeatIntro,
    /// Say goodbye and tear down
    Exit { farewell: String },
}

/// Where a trigger came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Trigger {
    Voice { transcript: String },
    Gesture { gesture: Gesture },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceCommand {
    pub triggers: Vec<String>,
    pub action: ActionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureCommand {
    pub gesture: Gesture,
    pub action: ActionId,
}

/// Command table as it appears in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub voice: Vec<VoiceCommand>,
    pub gestures: Vec<GestureCommand>,
    pub actions: BTreeMap<ActionId, Action>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let voice = |triggers: &[&str], action: &str| VoiceCommand {
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            action: ActionId::new(action),
        };
        let gesture = |gesture, action: &str| GestureCommand {
            gesture,
            action: ActionId::new(action),
        };

        let mut actions = BTreeMap::new();
        actions.insert(ActionId::new("capture"), Action::Capture);
        actions.insert(
            ActionId::new("navigate"),
            Action::Handoff {
                confirmation: "Navigation selected.".to_string(),
            },
        );
        actions.insert(ActionId::new("repeat"), Action::RepeatIntro);
        actions.insert(
            ActionId::new("exit"),
            Action::Exit {
                farewell: "Closing the app.".to_string(),
            },
        );

        Self {
            voice: vec![
                voice(&["navigation", "navigate"], "navigate"),
                voice(&["capture", "take a picture", "photo", "snap"], "capture"),
                voice(&["again", "repeat"], "repeat"),
                voice(&["exit", "quit", "close"], "exit"),
            ],
            gestures: vec![
                gesture(Gesture::DoubleTap, "capture"),
                gesture(Gesture::SwipeRight, "navigate"),
                gesture(Gesture::SwipeLeft, "repeat"),
            ],
            actions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("command refers to undefined action '{0}'")]
    UnknownAction(ActionId),

    #[error("voice command for '{0}' has no usable trigger phrase")]
    EmptyTriggers(ActionId),

    #[error("gesture {0} is bound more than once")]
    DuplicateGesture(Gesture),
}

/// Trim and lower-case a transcript for matching
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Pure lookup from triggers to actions
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    voice: Vec<(Vec<String>, ActionId)>,
    gestures: HashMap<Gesture, ActionId>,
    actions: HashMap<ActionId, Action>,
}

impl ActionRegistry {
    /// Build from configuration, preserving voice command order
    pub fn from_config(config: &CommandsConfig) -> Result<Self, RegistryError> {
        let actions: HashMap<ActionId, Action> = config
            .actions
            .iter()
            .map(|(id, action)| (id.clone(), action.clone()))
            .collect();

        let mut voice = Vec::with_capacity(config.voice.len());
        for command in &config.voice {
            if !actions.contains_key(&command.action) {
                return Err(RegistryError::UnknownAction(command.action.clone()));
            }
            let triggers: Vec<String> = command
                .triggers
                .iter()
                .map(|t| normalize(t))
                .filter(|t| !t.is_empty())
                .collect();
            if triggers.is_empty() {
                return Err(RegistryError::EmptyTriggers(command.action.clone()));
            }
            voice.push((triggers, command.action.clone()));
        }

        let mut gestures = HashMap::new();
        for binding in &config.gestures {
            if !actions.contains_key(&binding.action) {
                return Err(RegistryError::UnknownAction(binding.action.clone()));
            }
            if gestures.insert(binding.gesture, binding.action.clone()).is_some() {
                return Err(RegistryError::DuplicateGesture(binding.gesture));
            }
        }

        Ok(Self {
            voice,
            gestures,
            actions,
        })
    }

    /// First command whose trigger set has a phrase inside the transcript
    pub fn resolve_voice(&self, text: &str) -> Option<&ActionId> {
        let transcript = normalize(text);
        if transcript.is_empty() {
            return None;
        }
        self.voice
            .iter()
            .find(|(triggers, _)| triggers.iter().any(|t| transcript.contains(t.as_str())))
            .map(|(_, action)| action)
    }

    pub fn resolve_gesture(&self, gesture: Gesture) -> Option<&ActionId> {
        self.gestures.get(&gesture)
    }

    pub fn action(&self, id: &ActionId) -> Option<&Action> {
        self.actions.get(id)
    }
}
