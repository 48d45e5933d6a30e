//! Adapters over the external systems handlers observe and control.

pub mod http;
pub mod mpris;
pub mod pulse;
pub mod shell;

use std::collections::BTreeMap;

use crate::handler::SourceError;

/// Rounded integer percentage of a 0.0-1.0 fraction.
///
/// Halves round away from zero, so 0.005 maps to 1 and 0.004 to 0.
pub fn percent(fraction: f64) -> u32 {
    (fraction * 100.0).round().max(0.0) as u32
}

/// Something a [`Selector`] can pick: a media player, an audio stream.
pub trait Candidate {
    fn name(&self) -> &str;

    /// Whether this is the candidate to use when nothing is named
    fn is_active(&self) -> bool;

    fn property(&self, _key: &str) -> Option<&str> {
        None
    }

    fn property_matches(&self, key: &str, wanted: &str) -> bool {
        self.property(key) == Some(wanted)
    }

    fn name_matches(&self, wanted: &str) -> bool {
        self.name() == wanted
    }
}

/// How a handler locates its device among the ones currently present.
///
/// Resolved afresh on every query, since players and streams come and go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// First candidate in listing order that is active
    Active,
    /// First candidate whose name matches
    Named(String),
    /// Candidates whose properties contain every given pair
    Props(BTreeMap<String, String>),
}

impl Selector {
    /// Named selector if `name` is set, otherwise the active candidate
    pub fn named_or_active(name: Option<&str>) -> Self {
        match name {
            Some(name) => Selector::Named(name.to_string()),
            None => Selector::Active,
        }
    }

    pub fn matches<C: Candidate>(&self, candidate: &C) -> bool {
        match self {
            Selector::Active => candidate.is_active(),
            Selector::Named(name) => candidate.name_matches(name),
            Selector::Props(props) => props
                .iter()
                .all(|(key, value)| candidate.property_matches(key, value)),
        }
    }

    /// First match in listing order, or `DeviceNotFound` carrying `missing`
    pub fn resolve<C: Candidate>(
        &self,
        candidates: Vec<C>,
        missing: &str,
    ) -> Result<C, SourceError> {
        candidates
            .into_iter()
            .find(|c| self.matches(c))
            .ok_or_else(|| SourceError::DeviceNotFound(missing.to_string()))
    }

    /// Every match in listing order, or `DeviceNotFound` if there is none
    pub fn resolve_all<C: Candidate>(
        &self,
        candidates: Vec<C>,
        missing: &str,
    ) -> Result<Vec<C>, SourceError> {
        let matched: Vec<C> = candidates
            .into_iter()
            .filter(|c| self.matches(c))
            .collect();
        if matched.is_empty() {
            return Err(SourceError::DeviceNotFound(missing.to_string()));
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        name: &'static str,
        playing: bool,
        props: BTreeMap<String, String>,
    }

    impl Fake {
        fn new(name: &'static str, playing: bool) -> Self {
            Self {
                name,
                playing,
                props: BTreeMap::new(),
            }
        }

        fn with_prop(mut self, key: &str, value: &str) -> Self {
            self.props.insert(key.to_string(), value.to_string());
            self
        }
    }

    impl Candidate for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn is_active(&self) -> bool {
            self.playing
        }

        fn property(&self, key: &str) -> Option<&str> {
            self.props.get(key).map(String::as_str)
        }
    }

    fn players() -> Vec<Fake> {
        vec![Fake::new("A", false), Fake::new("B", true)]
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0.5), 50);
        assert_eq!(percent(0.004), 0);
        assert_eq!(percent(0.006), 1);
        assert_eq!(percent(0.005), 1);
        assert_eq!(percent(1.0), 100);
        assert_eq!(percent(1.5), 150);
        assert_eq!(percent(-0.2), 0);
    }

    #[test]
    fn test_active_picks_first_active() {
        let found = Selector::Active.resolve(players(), "none").unwrap();
        assert_eq!(found.name, "B");
    }

    #[test]
    fn test_named_ignores_playback_state() {
        let found = Selector::Named("A".into())
            .resolve(players(), "none")
            .unwrap();
        assert_eq!(found.name, "A");
    }

    #[test]
    fn test_no_match_is_device_not_found() {
        let err = Selector::Active
            .resolve(vec![Fake::new("A", false)], "Found no player")
            .err()
            .unwrap();
        assert_eq!(err, SourceError::DeviceNotFound("Found no player".into()));

        let err = Selector::Named("C".into())
            .resolve_all(players(), "Found no stream")
            .err()
            .unwrap();
        assert_eq!(err, SourceError::DeviceNotFound("Found no stream".into()));
    }

    #[test]
    fn test_resolve_all_keeps_listing_order() {
        let streams = vec![
            Fake::new("one", true),
            Fake::new("two", false),
            Fake::new("three", true),
        ];
        let names: Vec<&str> = Selector::Active
            .resolve_all(streams, "none")
            .unwrap()
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["one", "three"]);
    }

    #[test]
    fn test_props_require_every_pair() {
        let streams = vec![
            Fake::new("one", false).with_prop("application.name", "Firefox"),
            Fake::new("two", false)
                .with_prop("application.name", "Firefox")
                .with_prop("media.role", "music"),
        ];

        let props: BTreeMap<String, String> = [
            ("application.name".to_string(), "Firefox".to_string()),
            ("media.role".to_string(), "music".to_string()),
        ]
        .into();
        let selector = Selector::Props(props);

        let names: Vec<&str> = selector
            .resolve_all(streams, "none")
            .unwrap()
            .iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["two"]);
    }

    #[test]
    fn test_named_or_active() {
        assert_eq!(Selector::named_or_active(None), Selector::Active);
        assert_eq!(
            Selector::named_or_active(Some("spotify")),
            Selector::Named("spotify".into())
        );
    }
}
