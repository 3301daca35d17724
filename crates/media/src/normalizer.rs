//! [`MediaPipeline`] implementation.

use async_trait::async_trait;

use lh_domain::config::MediaConfig;
use lh_domain::error::{Error, Result};
use lh_domain::media::{MediaInput, MediaKind, MediaPipeline, NormalizedMedia};

use crate::classify;
use crate::ffmpeg::{FfmpegTranscoder, Transcoder};
use crate::plan::TranscodePlan;
use crate::{MP3_MIME, MP4_MIME, VOICE_NOTE_MIME};

pub struct MediaNormalizer<T = FfmpegTranscoder> {
    transcoder: T,
    config: MediaConfig,
}

impl MediaNormalizer<FfmpegTranscoder> {
    pub fn from_config(config: MediaConfig) -> Self {
        Self::new(FfmpegTranscoder::from_config(&config), config)
    }
}

impl<T: Transcoder> MediaNormalizer<T> {
    pub fn new(transcoder: T, config: MediaConfig) -> Self {
        Self { transcoder, config }
    }

    fn validate(&self, input: &MediaInput) -> Result<()> {
        if input.data.is_empty() {
            return Err(Error::MediaFormat("media payload is empty".into()));
        }
        if input.data.len() > self.config.max_bytes {
            return Err(Error::MediaFormat(format!(
                "media payload is {} bytes, limit is {}",
                input.data.len(),
                self.config.max_bytes
            )));
        }
        Ok(())
    }

    async fn audio(&self, input: MediaInput) -> Result<NormalizedMedia> {
        let ptt = classify::is_voice_note(&input.hints);
        let ext = classify::input_extension(&input.hints);

        if ptt {
            let data = self.transcoder.run(&TranscodePlan::voice_note(ext), &input.data).await?;
            return Ok(NormalizedMedia {
                kind: MediaKind::Audio,
                data,
                mimetype: VOICE_NOTE_MIME.into(),
                ptt: true,
                file_name: input.hints.file_name.map(|n| classify::with_extension(&n, "ogg")),
                thumbnail: None,
            });
        }

        let data = if classify::is_mp3(&input.hints) {
            input.data
        } else {
            self.transcoder.run(&TranscodePlan::mp3(ext), &input.data).await?
        };
        Ok(NormalizedMedia {
            kind: MediaKind::Audio,
            data,
            mimetype: MP3_MIME.into(),
            ptt: false,
            file_name: input.hints.file_name.map(|n| classify::with_extension(&n, "mp3")),
            thumbnail: None,
        })
    }

    async fn video(&self, input: MediaInput) -> Result<NormalizedMedia> {
        let ext = classify::input_extension(&input.hints);
        let plan = TranscodePlan::mp4(ext.clone(), self.config.video_width, self.config.video_height);
        let data = self.transcoder.run(&plan, &input.data).await?;

        // A missing thumbnail never fails the send.
        let thumbnail = match self
            .transcoder
            .run(&TranscodePlan::thumbnail(ext, self.config.video_width), &input.data)
            .await
        {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                tracing::warn!(error = %e, "video thumbnail extraction failed");
                None
            }
        };

        Ok(NormalizedMedia {
            kind: MediaKind::Video,
            data,
            mimetype: MP4_MIME.into(),
            ptt: false,
            file_name: input.hints.file_name.map(|n| classify::with_extension(&n, "mp4")),
            thumbnail,
        })
    }
}

#[async_trait]
impl<T: Transcoder> MediaPipeline for MediaNormalizer<T> {
    async fn transform(&self, input: MediaInput) -> Result<NormalizedMedia> {
        self.validate(&input)?;
        match input.kind {
            MediaKind::Audio => self.audio(input).await,
            MediaKind::Video => self.video(input).await,
            MediaKind::Image => {
                let mimetype = input
                    .hints
                    .mimetype
                    .clone()
                    .or_else(|| classify::sniff_image(&input.data).map(str::to_owned))
                    .ok_or_else(|| Error::MediaFormat("unrecognized image format".into()))?;
                Ok(NormalizedMedia {
                    kind: MediaKind::Image,
                    data: input.data,
                    mimetype,
                    ptt: false,
                    file_name: input.hints.file_name,
                    thumbnail: None,
                })
            }
            MediaKind::Document => Ok(NormalizedMedia {
                kind: MediaKind::Document,
                mimetype: input
                    .hints
                    .mimetype
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into()),
                data: input.data,
                ptt: false,
                file_name: input.hints.file_name,
                thumbnail: None,
            }),
        }
    }
}
