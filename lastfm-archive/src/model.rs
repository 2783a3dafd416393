use serde::{Deserialize, Serialize};

/// Covers are exclusively hosted on this server; stripping the prefix keeps
/// the archives small. The combine step can re-add it when rendering.
pub const COVER_PREFIX: &str = "https://lastfm-img2.akamaized.net/i/u/34s/";

/// One archived play. Serialized key order is part of the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scrobble {
    pub timestamp: i64,
    pub album: String,
    pub artist: String,
    pub title: String,
    pub cover: String,
}

impl Scrobble {
    /// Extracts the five persisted fields from an upstream track. Returns
    /// `None` for tracks without a date — upstream only omits it on
    /// now-playing rows, which are never archived.
    pub fn from_track(track: &Track) -> Option<Self> {
        let timestamp = track.date.as_ref()?.uts.parse().ok()?;

        let cover = track
            .image
            .first()
            .map(|img| img.url.strip_prefix(COVER_PREFIX).unwrap_or(&img.url))
            .unwrap_or_default()
            .to_string();

        Some(Self {
            timestamp,
            album: track.album.text.clone(),
            artist: track.artist.text.clone(),
            title: track.name.clone(),
            cover,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentTracksResponse {
    pub recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
pub struct RecentTracks {
    #[serde(default)]
    pub track: Vec<Track>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Track {
    pub artist: TextField,
    pub album: TextField,
    pub name: String,
    #[serde(default)]
    pub image: Vec<Image>,
    #[serde(default)]
    pub date: Option<TrackDate>,
    #[serde(rename = "@attr", default)]
    pub attr: Option<TrackAttr>,
}

impl Track {
    pub fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .is_some_and(|attr| attr.nowplaying.as_deref() == Some("true"))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TextField {
    #[serde(rename = "#text", default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Image {
    #[serde(rename = "#text", default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackDate {
    /// Unix timestamp; the API delivers it as a string.
    pub uts: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackAttr {
    #[serde(default)]
    pub nowplaying: Option<String>,
}
