use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Where the outbound video track currently comes from. Always exactly one
/// of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    Camera,
    Screen,
}

/// Camera + microphone tracks produced by a device backend.
pub struct UserMedia {
    pub audio: Arc<TrackLocalStaticSample>,
    pub video: Arc<TrackLocalStaticSample>,
}

/// Device access boundary.
///
/// Implementations own the actual capture hardware (or a test double) and
/// hand out local tracks. Acquisition failures are reported as
/// [`CallError::MediaAcquisition`] and are never retried by the core.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request camera + microphone access.
    async fn user_media(&self) -> Result<UserMedia, CallError>;

    /// Request a screen-capture video track.
    async fn display_media(&self) -> Result<Arc<TrackLocalStaticSample>, CallError>;
}

/// Owns the local tracks of a call and the per-kind senders they are
/// attached to. Exactly one outbound sender per media kind.
pub struct MediaTrackManager<D: MediaDevices> {
    devices: D,
    user: Option<UserMedia>,
    screen: Option<Arc<TrackLocalStaticSample>>,
    audio_enabled: bool,
    video_enabled: bool,
    video_source: VideoSource,
    audio_sender: Option<Arc<RTCRtpSender>>,
    video_sender: Option<Arc<RTCRtpSender>>,
}

impl<D: MediaDevices> MediaTrackManager<D> {
    pub fn new(devices: D) -> Self {
        Self {
            devices,
            user: None,
            screen: None,
            audio_enabled: true,
            video_enabled: true,
            video_source: VideoSource::Camera,
            audio_sender: None,
            video_sender: None,
        }
    }

    /// Request camera + microphone tracks from the device backend.
    /// Idempotent: an already-acquired track set is kept.
    pub async fn acquire(&mut self) -> Result<(), CallError> {
        if self.user.is_some() {
            return Ok(());
        }
        let user = self.devices.user_media().await?;
        self.user = Some(user);
        self.audio_enabled = true;
        self.video_enabled = true;
        self.video_source = VideoSource::Camera;
        info!("Local camera and microphone acquired");
        Ok(())
    }

    pub fn has_local_media(&self) -> bool {
        self.user.is_some()
    }

    /// Attach the local tracks to the peer connection, retaining one sender
    /// per kind for later track substitution.
    pub(crate) async fn attach(&mut self, pc: &RTCPeerConnection) -> Result<(), CallError> {
        let user = self.user.as_ref().ok_or_else(|| CallError::MediaAcquisition {
            reason: "local media not acquired".to_string(),
        })?;

        let audio_sender = pc
            .add_track(Arc::clone(&user.audio) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        let video_track = match (self.video_source, &self.screen) {
            (VideoSource::Screen, Some(screen)) => Arc::clone(screen),
            _ => Arc::clone(&user.video),
        };
        let video_sender = pc
            .add_track(video_track as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        self.audio_sender = Some(audio_sender);
        self.video_sender = Some(video_sender);
        Ok(())
    }

    /// Flip `enabled` on the active track of the kind; returns the new value,
    /// or None when no such track exists.
    pub fn toggle(&mut self, kind: MediaKind) -> Option<bool> {
        if self.user.is_none() && self.screen.is_none() {
            return None;
        }
        let flag = match kind {
            MediaKind::Audio => {
                self.user.as_ref()?;
                &mut self.audio_enabled
            }
            MediaKind::Video => &mut self.video_enabled,
        };
        *flag = !*flag;
        let enabled = *flag;
        debug!(?kind, enabled, "Track toggled");
        Some(enabled)
    }

    pub fn is_enabled(&self, kind: MediaKind) -> Option<bool> {
        if self.user.is_none() && self.screen.is_none() {
            return None;
        }
        match kind {
            MediaKind::Audio => self.user.as_ref().map(|_| self.audio_enabled),
            MediaKind::Video => Some(self.video_enabled),
        }
    }

    pub fn video_source(&self) -> VideoSource {
        self.video_source
    }

    /// Substitute a screen-capture track for the outbound video track.
    ///
    /// Same kind, so no renegotiation happens — the sender just switches what
    /// it pulls from. Returns false when a share is already active.
    pub async fn start_screen_share(&mut self) -> Result<bool, CallError> {
        if self.video_source == VideoSource::Screen {
            return Ok(false);
        }
        let screen = self.devices.display_media().await?;
        if let Some(sender) = &self.video_sender {
            sender
                .replace_track(Some(Arc::clone(&screen) as Arc<dyn TrackLocal + Send + Sync>))
                .await?;
        }
        self.screen = Some(screen);
        self.video_source = VideoSource::Screen;
        info!("Screen share started");
        Ok(true)
    }

    /// Explicitly stop sharing and restore the camera track.
    pub async fn stop_screen_share(&mut self) -> Result<bool, CallError> {
        self.restore_camera(false).await
    }

    /// The share ended outside our control (browser/OS chrome, window gone).
    /// Consumed once: a second notification after the camera is back is a
    /// no-op, never a re-entry.
    pub async fn screen_share_ended(&mut self) -> Result<bool, CallError> {
        self.restore_camera(true).await
    }

    async fn restore_camera(&mut self, external: bool) -> Result<bool, CallError> {
        if self.video_source != VideoSource::Screen {
            return Ok(false);
        }
        self.screen = None;
        if let (Some(sender), Some(user)) = (&self.video_sender, &self.user) {
            sender
                .replace_track(Some(
                    Arc::clone(&user.video) as Arc<dyn TrackLocal + Send + Sync>
                ))
                .await?;
        }
        self.video_source = VideoSource::Camera;
        if external {
            info!("Screen share ended externally, camera track restored");
        } else {
            info!("Screen share stopped");
        }
        Ok(true)
    }

    /// Drop every local track and device handle. Called once by teardown;
    /// safe to call again.
    pub fn release_all(&mut self) {
        if self.user.is_none() && self.screen.is_none() {
            return;
        }
        self.user = None;
        self.screen = None;
        self.audio_sender = None;
        self.video_sender = None;
        self.video_source = VideoSource::Camera;
        info!("Local media released");
    }
}

/// [`MediaDevices`] backed by [`TrackLocalStaticSample`]s.
///
/// The application pumps encoded VP8/Opus samples through the writer methods;
/// whether anything is written is the application's mute policy — the manager
/// only tracks the `enabled` flags.
pub struct SampleDevices {
    camera: Arc<TrackLocalStaticSample>,
    microphone: Arc<TrackLocalStaticSample>,
    screen: Arc<TrackLocalStaticSample>,
}

impl SampleDevices {
    pub fn new() -> Self {
        let camera = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            "camera".to_string(),
            "huddle".to_string(),
        ));
        let microphone = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            "huddle".to_string(),
        ));
        let screen = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            "screen".to_string(),
            "huddle".to_string(),
        ));
        Self {
            camera,
            microphone,
            screen,
        }
    }

    pub async fn write_camera_sample(
        &self,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), webrtc::Error> {
        self.camera
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
    }

    pub async fn write_microphone_sample(
        &self,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), webrtc::Error> {
        self.microphone
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
    }

    pub async fn write_screen_sample(
        &self,
        data: Bytes,
        duration: Duration,
    ) -> Result<(), webrtc::Error> {
        self.screen
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
    }
}

impl Default for SampleDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SampleDevices {
    async fn user_media(&self) -> Result<UserMedia, CallError> {
        Ok(UserMedia {
            audio: Arc::clone(&self.microphone),
            video: Arc::clone(&self.camera),
        })
    }

    async fn display_media(&self) -> Result<Arc<TrackLocalStaticSample>, CallError> {
        Ok(Arc::clone(&self.screen))
    }
}
