//! Key binding registry with priority-ordered lookup
//!
//! Patterns are lowercase `+`-joined tokens: any of `ctrl|control`,
//! `alt|option`, `shift`, `meta|cmd|super`, followed by the key itself
//! (`"ctrl+shift+a"`, `"f5"`, `"alt+enter"`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::{KeyEvent, Modifiers};
use crate::handler::Handler;

/// A parsed binding pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    /// Normalized key token; empty for modifier-only chords
    pub key: String,
    pub modifiers: Modifiers,
}

/// Parse a pattern like `"ctrl+p"` or `"Shift+Tab"`.
///
/// Never fails: the last non-modifier token becomes the key, and a pattern
/// made only of modifiers yields an empty key that no key press can match.
pub fn parse_key_pattern(pattern: &str) -> KeyPattern {
    let pattern = pattern.trim().to_lowercase();
    let mut modifiers = Modifiers::empty();
    let mut key = String::new();

    for token in pattern.split('+') {
        match token.trim() {
            "ctrl" | "control" => modifiers |= Modifiers::CTRL,
            "alt" | "option" => modifiers |= Modifiers::ALT,
            "shift" => modifiers |= Modifiers::SHIFT,
            "meta" | "cmd" | "super" => modifiers |= Modifiers::META,
            other => key = normalize_key_name(other),
        }
    }

    KeyPattern { key, modifiers }
}

/// Map key-name aliases onto the names the decoder emits.
pub fn normalize_key_name(name: &str) -> String {
    match name {
        "esc" => "escape".to_string(),
        "return" => "enter".to_string(),
        "del" => "delete".to_string(),
        "pgup" => "pageup".to_string(),
        "pgdn" => "pagedown".to_string(),
        " " => "space".to_string(),
        other => other.to_string(),
    }
}

/// Whether `event` is exactly the chord described by `pattern`.
///
/// All four modifier flags must agree; an extra held modifier is a miss.
pub fn matches_pattern(event: &KeyEvent, pattern: &str) -> bool {
    let parsed = parse_key_pattern(pattern);
    !parsed.key.is_empty() && parsed.key == event.key && parsed.modifiers == event.modifiers
}

/// Format a pattern for display (e.g., "ctrl+p" -> "^P", "q" -> "Q", "pageup" -> "PgUp")
pub fn format_key_for_display(pattern: &str) -> String {
    let parsed = parse_key_pattern(pattern);

    let mut prefix = String::new();
    if parsed.modifiers.contains(Modifiers::CTRL) {
        prefix.push('^');
    }
    if parsed.modifiers.contains(Modifiers::ALT) {
        prefix.push_str("Alt+");
    }
    if parsed.modifiers.contains(Modifiers::SHIFT) {
        prefix.push_str("Shift+");
    }
    if parsed.modifiers.contains(Modifiers::META) {
        prefix.push_str("Meta+");
    }

    let key_display = match parsed.key.as_str() {
        "escape" => "Esc".to_string(),
        "enter" => "Enter".to_string(),
        "tab" => "Tab".to_string(),
        "backspace" => "Backspace".to_string(),
        "up" => "Up".to_string(),
        "down" => "Down".to_string(),
        "left" => "Left".to_string(),
        "right" => "Right".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        "pageup" => "PgUp".to_string(),
        "pagedown" => "PgDn".to_string(),
        "delete" => "Del".to_string(),
        "insert" => "Ins".to_string(),
        "space" => "Space".to_string(),
        f if f.len() > 1 && f.starts_with('f') && f[1..].chars().all(|c| c.is_ascii_digit()) => {
            f.to_uppercase()
        }
        other => other.to_uppercase(),
    };

    format!("{}{}", prefix, key_display)
}

/// Unique binding identifier, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub u64);

/// Per-binding options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingOptions {
    pub description: Option<String>,
    /// Higher runs first
    pub priority: i32,
    /// Checked for every key rather than only its own key bucket
    pub global: bool,
    pub enabled: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            description: None,
            priority: 0,
            global: false,
            enabled: true,
        }
    }
}

impl BindingOptions {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A key pattern associated with a handler.
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub id: BindingId,
    /// Pattern string such as `"ctrl+shift+a"`
    pub keys: String,
    pub handler: Handler<KeyEvent>,
    pub options: BindingOptions,
}

impl KeyBinding {
    /// Whether `event` triggers this binding (pattern only, ignores `enabled`).
    pub fn matches(&self, event: &KeyEvent) -> bool {
        matches_pattern(event, &self.keys)
    }
}

/// Registry holding global bindings and per-key buckets.
///
/// Every list is kept sorted by descending priority; equal priorities
/// keep insertion order.
#[derive(Debug, Default)]
pub struct KeyBindingRegistry {
    global: Vec<KeyBinding>,
    by_key: HashMap<String, Vec<KeyBinding>>,
    next_id: u64,
}

impl KeyBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a binding with a fresh id. It is not registered until
    /// [`add_binding`](Self::add_binding) is called.
    pub fn create_binding(
        &mut self,
        keys: impl Into<String>,
        handler: Handler<KeyEvent>,
        options: BindingOptions,
    ) -> KeyBinding {
        self.next_id += 1;
        KeyBinding {
            id: BindingId(self.next_id),
            keys: keys.into(),
            handler,
            options,
        }
    }

    /// Register a binding globally or under its key bucket.
    pub fn add_binding(&mut self, mut binding: KeyBinding, is_global: bool) {
        binding.options.global = is_global;
        let list = if is_global {
            &mut self.global
        } else {
            let bucket = parse_key_pattern(&binding.keys).key;
            self.by_key.entry(bucket).or_default()
        };
        list.push(binding);
        sort_by_priority(list);
    }

    /// Create and register in one step, honoring `options.global`.
    pub fn bind(
        &mut self,
        keys: impl Into<String>,
        handler: Handler<KeyEvent>,
        options: BindingOptions,
    ) -> BindingId {
        let is_global = options.global;
        let binding = self.create_binding(keys, handler, options);
        let id = binding.id;
        self.add_binding(binding, is_global);
        id
    }

    /// Remove the first binding with `id`. Returns whether one was removed.
    pub fn remove_binding(&mut self, id: BindingId) -> bool {
        if let Some(pos) = self.global.iter().position(|b| b.id == id) {
            self.global.remove(pos);
            return true;
        }
        for bucket in self.by_key.values_mut() {
            if let Some(pos) = bucket.iter().position(|b| b.id == id) {
                bucket.remove(pos);
                return true;
            }
        }
        false
    }

    /// Enable or disable a binding. Returns `false` for an unknown id.
    pub fn set_enabled(&mut self, id: BindingId, enabled: bool) -> bool {
        match self.binding_mut(id) {
            Some(binding) => {
                binding.options.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable(&mut self, id: BindingId) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: BindingId) -> bool {
        self.set_enabled(id, false)
    }

    /// Look up a binding by id.
    pub fn get(&self, id: BindingId) -> Option<&KeyBinding> {
        self.global
            .iter()
            .chain(self.by_key.values().flatten())
            .find(|b| b.id == id)
    }

    fn binding_mut(&mut self, id: BindingId) -> Option<&mut KeyBinding> {
        self.global
            .iter_mut()
            .chain(self.by_key.values_mut().flatten())
            .find(|b| b.id == id)
    }

    /// Enabled global bindings followed by enabled bindings in the event's
    /// key bucket. Not yet checked against the pattern.
    pub fn get_potential_bindings(&self, event: &KeyEvent) -> Vec<&KeyBinding> {
        let bucket = self.by_key.get(&event.key).into_iter().flatten();
        self.global
            .iter()
            .chain(bucket)
            .filter(|b| b.options.enabled)
            .collect()
    }

    /// Enabled bindings that match `event`, highest priority first.
    pub fn find_matching(&self, event: &KeyEvent) -> Vec<KeyBinding> {
        let mut matching: Vec<KeyBinding> = self
            .get_potential_bindings(event)
            .into_iter()
            .filter(|b| b.matches(event))
            .cloned()
            .collect();
        sort_by_priority(&mut matching);
        matching
    }

    /// Bindings registered under a key bucket, in dispatch order.
    pub fn get_bindings_by_key(&self, key: &str) -> &[KeyBinding] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn global_bindings(&self) -> &[KeyBinding] {
        &self.global
    }

    /// Total number of registered bindings.
    pub fn len(&self) -> usize {
        self.global.len() + self.by_key.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every binding. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.global.clear();
        self.by_key.clear();
    }
}

fn sort_by_priority(list: &mut [KeyBinding]) {
    // stable: equal priorities keep insertion order
    list.sort_by(|a, b| b.options.priority.cmp(&a.options.priority));
}
