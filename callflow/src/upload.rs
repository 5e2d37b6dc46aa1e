//! Multi-step media upload flows.
//!
//! Every flow follows the same shape: ask an API method for an upload server,
//! post the media there, then (for most flows) hand the server's answer to a
//! save method. Each flow returns a [`Chain`] so callers install callbacks,
//! configure and cancel it like any single request.

use crate::config::RequestConfig;
use crate::errors::RequestError;
use crate::pipeline::{forced_int, forced_str, optional_str, Chain};
use crate::request::{Media, Params, PartType, Request};
use crate::session::Session;
use serde_json::Value;

/// Most photos one album upload sends. Extra media are dropped.
pub const MAX_ALBUM_PHOTOS: usize = 5;

/// Owner of the album or wall receiving an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// A user.
    User(String),
    /// A community.
    Group(String),
}

impl UploadTarget {
    fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::Group(_) => None,
        }
    }

    fn group_id(&self) -> Option<&str> {
        match self {
            Self::Group(id) => Some(id),
            Self::User(_) => None,
        }
    }

    fn params(&self) -> Params {
        Params::new()
            .set("user_id", self.user_id())
            .set("group_id", self.group_id())
    }
}

/// Geographic position attached to album photos.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Crop of a market item's main photo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainPhotoCrop {
    /// Left edge.
    pub x: Option<u32>,
    /// Top edge.
    pub y: Option<u32>,
    /// Width of the square crop.
    pub width: Option<u32>,
}

/// Builds the step that posts `media` to the server named in `upload_url`.
fn upload_step(
    session: &Session,
    media: Vec<Media>,
    part_type: PartType,
) -> impl Fn(Value) -> Result<Request, RequestError> + Send + Sync + 'static {
    let session = session.clone();
    move |response| {
        let url = forced_str(&response, "upload_url")?;
        Ok(session
            .upload(url, media.clone(), part_type)
            .configured(&RequestConfig::upload()))
    }
}

/// Reads the `server` and `hash` fields every upload server returns.
fn server_and_hash(response: &Value) -> Result<Params, RequestError> {
    Ok(Params::new()
        .set("server", forced_int(response, "server")?)
        .set("hash", forced_str(response, "hash")?))
}

/// Uploads up to [`MAX_ALBUM_PHOTOS`] photos into an album.
pub fn photo_to_album(
    session: &Session,
    media: Vec<Media>,
    target: &UploadTarget,
    album_id: &str,
    caption: Option<&str>,
    location: Option<GeoPoint>,
) -> Chain {
    let media: Vec<Media> = media.into_iter().take(MAX_ALBUM_PHOTOS).collect();
    let owner = target.params().set("album_id", album_id);
    let save_params = owner
        .clone()
        .set("caption", caption)
        .set("latitude", location.map(|l| l.latitude))
        .set("longitude", location.map(|l| l.longitude));

    let save = session.clone();
    session
        .api("photos.getUploadServer", owner)
        .chain(upload_step(session, media, PartType::IndexedFile))
        .chain(move |response| {
            let mut params = save_params.clone();
            params.insert("server", forced_int(&response, "server")?);
            params.insert("photos_list", forced_str(&response, "photos_list")?);
            params.insert("aid", forced_int(&response, "aid")?);
            params.insert("hash", forced_str(&response, "hash")?);
            Ok(save.api("photos.save", params))
        })
}

/// Uploads a photo for use in a message.
pub fn photo_to_message(session: &Session, media: Media) -> Chain {
    let save = session.clone();
    session
        .api("photos.getMessagesUploadServer", Params::new())
        .chain(upload_step(session, vec![media], PartType::Photo))
        .chain(move |response| {
            let mut params = server_and_hash(&response)?;
            params.insert("photo", forced_str(&response, "photo")?);
            Ok(save.api("photos.saveMessagesPhoto", params))
        })
}

/// Uploads a photo for use in a wall post.
pub fn photo_to_wall(session: &Session, media: Media, target: &UploadTarget) -> Chain {
    let owner = target.params();
    let save_params = owner.clone();
    let save = session.clone();
    session
        .api("photos.getWallUploadServer", owner)
        .chain(upload_step(session, vec![media], PartType::Photo))
        .chain(move |response| {
            let mut params = save_params.clone();
            params.extend(server_and_hash(&response)?);
            params.insert("photo", forced_str(&response, "photo")?);
            Ok(save.api("photos.saveWallPhoto", params))
        })
}

/// Uploads a market item photo. `main_photo` marks it as the item's cover.
pub fn photo_to_market(
    session: &Session,
    media: Media,
    group_id: &str,
    main_photo: Option<MainPhotoCrop>,
) -> Chain {
    let group = Params::new().set("group_id", group_id);
    let save_params = group
        .clone()
        .set("main_photo", main_photo.is_some())
        .set("crop_x", main_photo.as_ref().and_then(|c| c.x))
        .set("crop_y", main_photo.as_ref().and_then(|c| c.y))
        .set("crop_width", main_photo.as_ref().and_then(|c| c.width));

    let save = session.clone();
    session
        .api("photos.getMarketUploadServer", group)
        .chain(upload_step(session, vec![media], PartType::File))
        .chain(move |response| {
            let mut params = save_params.clone();
            params.extend(server_and_hash(&response)?);
            params.insert("photo", forced_str(&response, "photo")?);
            params.insert("crop_data", optional_str(&response, "crop_data"));
            params.insert("crop_hash", optional_str(&response, "crop_hash"));
            Ok(save.api("photos.saveMarketPhoto", params))
        })
}

/// Uploads a market album cover.
pub fn photo_to_market_album(session: &Session, media: Media, group_id: &str) -> Chain {
    let group = Params::new().set("group_id", group_id);
    let save_params = group.clone();
    let save = session.clone();
    session
        .api("photos.getMarketAlbumUploadServer", group)
        .chain(upload_step(session, vec![media], PartType::File))
        .chain(move |response| {
            let mut params = save_params.clone();
            params.extend(server_and_hash(&response)?);
            params.insert("photo", forced_str(&response, "photo")?);
            Ok(save.api("photos.saveMarketAlbumPhoto", params))
        })
}

/// Uploads a video. `saving` carries `video.save` parameters such as name
/// and privacy.
pub fn video(session: &Session, media: Media, saving: Params) -> Chain {
    session
        .api("video.save", saving)
        .chain(upload_step(session, vec![media], PartType::Video))
}

/// Uploads an audio file.
pub fn audio(session: &Session, media: Media, artist: Option<&str>, title: Option<&str>) -> Chain {
    let tags = Params::new().set("artist", artist).set("title", title);
    let save = session.clone();
    session
        .api("audio.getUploadServer", Params::new())
        .chain(upload_step(session, vec![media], PartType::File))
        .chain(move |response| {
            let mut params = tags.clone();
            params.extend(server_and_hash(&response)?);
            params.insert("audio", forced_str(&response, "audio")?);
            Ok(save.api("audio.save", params))
        })
}

/// Uploads a document, optionally into a community.
pub fn document(
    session: &Session,
    media: Media,
    group_id: Option<&str>,
    title: Option<&str>,
    tags: Option<&str>,
) -> Chain {
    let describe = Params::new().set("title", title).set("tags", tags);
    let save = session.clone();
    session
        .api("docs.getUploadServer", Params::new().set("group_id", group_id))
        .chain(upload_step(session, vec![media], PartType::File))
        .chain(move |response| {
            let mut params = describe.clone();
            params.insert("file", forced_str(&response, "file")?);
            Ok(save.api("docs.save", params))
        })
}
