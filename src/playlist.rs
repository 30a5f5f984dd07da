use std::path::Path;

/// A resolved media location. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    uri: String,
}

impl PlaylistEntry {
    /// Resolve a raw command-line input into a playable location.
    ///
    /// Existing files become absolute `file://` URIs; everything else is
    /// passed through verbatim and left for the engine to judge.
    pub fn resolve(input: &str) -> Self {
        let path = Path::new(input);
        if path.is_file() {
            if let Ok(absolute) = std::path::absolute(path) {
                return Self {
                    uri: format!("file://{}", absolute.display()),
                };
            }
        }
        Self {
            uri: input.to_string(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Ordered playback queue with a next-unplayed cursor.
///
/// The cursor only ever moves forward. Clearing the playlist empties the
/// pending entries but leaves the cursor where it is, so entries that were
/// already handed out keep their positions.
#[derive(Debug, Clone)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    cursor: usize,
}

impl Playlist {
    pub fn new(entries: Vec<PlaylistEntry>) -> Self {
        Self { entries, cursor: 0 }
    }

    /// Resolve all raw inputs into a playlist, preserving order.
    pub fn from_inputs<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            inputs
                .into_iter()
                .map(|input| PlaylistEntry::resolve(input.as_ref()))
                .collect(),
        )
    }

    /// Hand out the next unplayed entry and advance the cursor.
    ///
    /// The cursor moves before the caller gets to act on the entry, so a
    /// failed load can never be handed out twice.
    pub fn next_entry(&mut self) -> Option<PlaylistEntry> {
        let entry = self.entries.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(entry)
    }

    /// Drop every pending entry without rewinding the cursor.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
