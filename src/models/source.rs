//! Provider categories a container can come from.

use std::fmt;
use std::str::FromStr;

/// The closed set of upstream provider categories.
///
/// A container's source is always carried from the query that produced it,
/// never inferred from its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Torrents,
    WebDl,
    Usenet,
}

impl Source {
    /// Every source, in the order the root listing fans out to them.
    pub const ALL: [Source; 3] = [Source::Torrents, Source::WebDl, Source::Usenet];

    /// Path segment used both by the upstream API and by local routes.
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Torrents => "torrents",
            Source::WebDl => "webdl",
            Source::Usenet => "usenet",
        }
    }

    /// Query parameter naming the container id on the download-link endpoint.
    pub fn download_id_param(self) -> &'static str {
        match self {
            Source::Torrents => "torrent_id",
            Source::WebDl => "web_id",
            Source::Usenet => "usenet_id",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == value)
            .ok_or(())
    }
}
