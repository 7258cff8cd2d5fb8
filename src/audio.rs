use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, info, warn};
use rodio::{source::SineWave, Decoder, Sink, Source};

use crate::{
    error::{AlarmError, Result},
    platform::{AlarmTone, AudioHandle, AudioOutput},
};

type BoxedSource = Box<dyn Source + Send>;

/// Picks the custom sound if it can be read right now, otherwise the
/// default alarm tone.
#[must_use]
pub fn resolve_tone(audio: Option<&Path>) -> AlarmTone {
    match audio.map(|path| readable(path).map(|()| path)) {
        Some(Ok(path)) => {
            debug!(target: "audio", "using custom audio {}", path.display());
            AlarmTone::Custom(path.to_path_buf())
        }
        Some(Err(e)) => {
            warn!(target: "audio", "{e}, using default alarm sound");
            AlarmTone::Default
        }
        None => AlarmTone::Default,
    }
}

fn readable(path: &Path) -> Result<()> {
    let unavailable = |reason: String| AlarmError::ResourceUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
    let metadata = file.metadata().map_err(|e| unavailable(e.to_string()))?;
    if metadata.is_file() {
        Ok(())
    } else {
        Err(unavailable("not a file".to_string()))
    }
}

enum Request {
    Play {
        tone: AlarmTone,
        reply: Sender<Sink>,
    },
}

/// Plays through the default output device. The output stream lives on its
/// own thread for as long as this does.
pub struct RodioOutput {
    requests: Sender<Request>,
}

impl RodioOutput {
    /// `volume` is 0 - 100. `default_tone` is played in place of sounds that
    /// can't be decoded, a beep is synthesized when it is `None`.
    ///
    /// # Errors
    /// if there is no output device
    pub fn open(volume: f32, default_tone: Option<PathBuf>) -> Result<Self> {
        let (requests, incoming) = unbounded::<Request>();
        let (ready, opened) = bounded::<std::result::Result<(), String>>(1);
        thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || {
                let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => {
                        let _ = ready.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready.send(Err(e.to_string()));
                        return;
                    }
                };
                for request in incoming {
                    match request {
                        Request::Play { tone, reply } => {
                            let sink = Sink::connect_new(stream.mixer());
                            sink.set_volume(volume / 100.0);
                            sink.append(looping_source(&tone, default_tone.as_deref()));
                            sink.play();
                            let _ = reply.send(sink);
                        }
                    }
                }
                info!(target: "audio", "audio thread shutting down");
            })
            .map_err(|e| AlarmError::platform("audio", e.to_string()))?;

        match opened.recv() {
            Ok(Ok(())) => Ok(Self { requests }),
            Ok(Err(e)) => Err(AlarmError::platform("audio", e)),
            Err(_) => Err(AlarmError::platform("audio", "audio thread died")),
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play_looping(&self, tone: &AlarmTone) -> Result<Box<dyn AudioHandle>> {
        let (reply, sink) = bounded(1);
        self.requests
            .send(Request::Play {
                tone: tone.clone(),
                reply,
            })
            .map_err(|_| AlarmError::platform("audio", "audio thread is gone"))?;
        let sink = sink
            .recv()
            .map_err(|_| AlarmError::platform("audio", "audio thread dropped the request"))?;
        Ok(Box::new(RodioHandle { sink }))
    }
}

fn looping_source(tone: &AlarmTone, default_tone: Option<&Path>) -> BoxedSource {
    match tone {
        AlarmTone::Custom(path) => decode_looping(path).unwrap_or_else(|e| {
            warn!(target: "audio", "{e}, using default alarm sound");
            default_source(default_tone)
        }),
        AlarmTone::Default => default_source(default_tone),
    }
}

fn default_source(default_tone: Option<&Path>) -> BoxedSource {
    default_tone
        .and_then(|path| {
            decode_looping(path)
                .map_err(|e| warn!(target: "audio", "{e}, falling back to beeping"))
                .ok()
        })
        .unwrap_or_else(beep)
}

fn decode_looping(path: &Path) -> Result<BoxedSource> {
    let unavailable = |reason: String| AlarmError::ResourceUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| unavailable(e.to_string()))?;
    Ok(Box::new(decoder.repeat_infinite()))
}

/// half a second of 880hz after 300ms of quiet, forever
fn beep() -> BoxedSource {
    Box::new(
        SineWave::new(880.0)
            .take_duration(Duration::from_millis(500))
            .amplify(0.5)
            .delay(Duration::from_millis(300))
            .repeat_infinite(),
    )
}

struct RodioHandle {
    sink: Sink,
}

impl AudioHandle for RodioHandle {
    fn is_playing(&self) -> bool {
        !self.sink.empty() && !self.sink.is_paused()
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}

impl Drop for RodioHandle {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

/// Output for machines without a sound device. Tracks playback state so
/// everything else behaves the same.
#[derive(Debug, Default)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn play_looping(&self, tone: &AlarmTone) -> Result<Box<dyn AudioHandle>> {
        info!(target: "audio", "no output device, silently playing {tone:?}");
        Ok(Box::new(SilentHandle { playing: true }))
    }
}

struct SilentHandle {
    playing: bool,
}

impl AudioHandle for SilentHandle {
    fn is_playing(&self) -> bool {
        self.playing
    }

    fn stop(&mut self) {
        self.playing = false;
    }
}
