//! Audio offload. Transcription and synthesis jobs go through one queue served by a fixed
//! set of worker tasks; each caller waits only on its own job's oneshot reply.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{KitchenPaError, Result};
use crate::interfaces::speech::{SpeechToText, TextToSpeech, Transcript};

pub mod pronunciation;
mod schema;

pub use pronunciation::{apply_pronunciations, Pronunciation, PronunciationStore};

const QUEUE_DEPTH: usize = 32;

enum AudioJob {
    Transcribe {
        audio: Vec<u8>,
        input_format: String,
        reply: oneshot::Sender<Result<Transcript>>,
    },
    Synthesize {
        text: String,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
}

#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub voice: String,
    pub format: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: "fable".to_string(),
            format: "opus".to_string(),
        }
    }
}

struct WorkerContext {
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    pronunciations: Option<Arc<PronunciationStore>>,
    voice: VoiceSettings,
}

impl WorkerContext {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let spoken = match &self.pronunciations {
            Some(store) => match store.list().await {
                Ok(overrides) => apply_pronunciations(text, &overrides),
                Err(err) => {
                    tracing::warn!(error = %err, "Pronunciation lookup failed");
                    text.to_string()
                }
            },
            None => text.to_string(),
        };
        self.tts
            .synthesize(&spoken, &self.voice.voice, &self.voice.format)
            .await
    }
}

pub struct AudioWorker {
    tx: mpsc::Sender<AudioJob>,
    handles: Vec<JoinHandle<()>>,
}

impl AudioWorker {
    pub fn spawn(
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        pronunciations: Option<Arc<PronunciationStore>>,
        voice: VoiceSettings,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<AudioJob>(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));
        let context = Arc::new(WorkerContext {
            stt,
            tts,
            pronunciations,
            voice,
        });

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        match job {
                            AudioJob::Transcribe {
                                audio,
                                input_format,
                                reply,
                            } => {
                                let result = context.stt.transcribe(audio, &input_format).await;
                                if reply.send(result).is_err() {
                                    tracing::debug!(worker_id, "Transcription caller went away");
                                }
                            }
                            AudioJob::Synthesize { text, reply } => {
                                let result = context.synthesize(&text).await;
                                if reply.send(result).is_err() {
                                    tracing::debug!(worker_id, "Synthesis caller went away");
                                }
                            }
                        }
                    }
                    tracing::debug!(worker_id, "Audio worker stopped");
                })
            })
            .collect();

        Self { tx, handles }
    }

    pub async fn transcribe(&self, audio: Vec<u8>, input_format: &str) -> Result<Transcript> {
        if audio.is_empty() {
            return Err(KitchenPaError::validation("audio body is empty"));
        }
        let (reply, done) = oneshot::channel();
        self.submit(AudioJob::Transcribe {
            audio,
            input_format: input_format.to_string(),
            reply,
        })
        .await?;
        done.await
            .map_err(|_| KitchenPaError::Runtime("audio worker dropped the job".to_string()))?
    }

    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(KitchenPaError::validation("text is required"));
        }
        let (reply, done) = oneshot::channel();
        self.submit(AudioJob::Synthesize {
            text: text.to_string(),
            reply,
        })
        .await?;
        done.await
            .map_err(|_| KitchenPaError::Runtime("audio worker dropped the job".to_string()))?
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    async fn submit(&self, job: AudioJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| KitchenPaError::Runtime("audio worker is not running".to_string()))
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
