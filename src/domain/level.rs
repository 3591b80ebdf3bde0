// Level catalog entries resolved from atlas download filenames.

/// A Dustforce level resolved from an atlas catalog filename, e.g. `"icecave-104"`.
///
/// Stock maps that ship with the game have no numeric suffix and therefore no `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    pub filename: String,
    pub id: Option<u32>,
    pub display_name: String,
}

impl Level {
    pub fn from_filename(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let id = filename
            .rsplit_once('-')
            .and_then(|(_, suffix)| suffix.parse::<u32>().ok());

        let name_part = if id.is_some() {
            filename.rsplit_once('-').map(|(prefix, _)| prefix).unwrap_or(&filename)
        } else {
            filename.as_str()
        };

        Self {
            display_name: name_part.replace('-', " "),
            filename,
            id,
        }
    }

    pub fn image_url(&self) -> String {
        format!("https://atlas.dustforce.com/img/{}.png", self.filename)
    }

    pub fn install_play_url(&self) -> String {
        format!("dustforce://downloadmap/{}", self.filename)
    }

    pub fn atlas_url(&self) -> Option<String> {
        self.id.map(|id| format!("https://atlas.dustforce.com/{id}"))
    }

    pub fn dustkid_url(&self) -> String {
        format!("https://dustkid.com/level/{}", self.filename)
    }
}

/// Aggregate leaderboard stats for a level, used by rotating lobbies to judge
/// whether a randomly drawn level is worth playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelStats {
    pub ss_count: u32,
    pub fastest_ss: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_numeric_suffix_and_hyphens() {
        let level = Level::from_filename("my-cool-level-104");
        assert_eq!(level.id, Some(104));
        assert_eq!(level.display_name, "my cool level");
    }

    #[test]
    fn stock_map_has_no_id_or_atlas_url() {
        let level = Level::from_filename("tarsier");
        assert_eq!(level.id, None);
        assert_eq!(level.display_name, "tarsier");
        assert_eq!(level.atlas_url(), None);
    }
}
