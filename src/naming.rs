//! Storage names for uploaded images.
//!
//! Every file of one upload request is named from the same [`UploadStamp`], so a
//! front/back pair can be matched on disk by its date prefix and token.

use chrono::{DateTime, Local, TimeZone};
use rand::Rng;

use crate::config::UPLOAD_TOKEN_RANGE;

/// Which half of the daily pair a file belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageSide {
    Front,
    Back,
}

impl ImageSide {
    /// Multipart field name for this side.
    pub fn field_name(self) -> &'static str {
        match self {
            ImageSide::Front => "front",
            ImageSide::Back => "back",
        }
    }

    pub fn from_field_name(name: &str) -> Option<Self> {
        match name {
            "front" => Some(ImageSide::Front),
            "back" => Some(ImageSide::Back),
            _ => None,
        }
    }
}

/// Capture time and random token shared by all files of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadStamp {
    formatted_date: String,
    token: u32,
}

impl UploadStamp {
    pub fn new<Tz: TimeZone>(captured_at: &DateTime<Tz>, token: u32) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            formatted_date: captured_at.format("%Y_%m_%d-%H_%M").to_string(),
            token,
        }
    }

    /// Stamps `captured_at` with a fresh random token.
    pub fn generate(captured_at: &DateTime<Local>) -> Self {
        let token = rand::rng().random_range(0..UPLOAD_TOKEN_RANGE);
        Self::new(captured_at, token)
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    /// `<date>-<side>-<token>.<ext>`; `extension` is given without the dot.
    pub fn file_name(&self, side: ImageSide, extension: &str) -> String {
        if extension.is_empty() {
            return format!(
                "{}-{}-{}",
                self.formatted_date,
                side.field_name(),
                self.token
            );
        }
        format!(
            "{}-{}-{}.{}",
            self.formatted_date,
            side.field_name(),
            self.token,
            extension
        )
    }
}
