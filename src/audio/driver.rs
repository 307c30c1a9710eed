//! Hardware stream driver
//!
//! Opens one input and one output stream with cpal and forwards their
//! callbacks to a [`StreamHandler`]. Streams are created and kept alive on a
//! dedicated thread since `cpal::Stream` is not `Send` on every backend.
//!
//! Devices whose native sample type is `f32` are converted to and from `i16`
//! at the edge. Rate and channel count are requested as configured and never
//! converted.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{DriverConfig, EngineConfig};
use crate::error::DriverError;
use crate::pipeline::StreamHandler;

/// Initial scratch size; covers common hardware periods without reallocating
const SCRATCH_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Running capture + playback stream pair
pub struct HardwareDriver {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<DriverError>,
    config: StreamConfig,
}

impl HardwareDriver {
    /// Open devices, start both streams and begin calling `handler`.
    ///
    /// Returns once the streams are playing or failed to open.
    pub fn start(
        driver: &DriverConfig,
        engine: &EngineConfig,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Self, DriverError> {
        let config = StreamConfig {
            channels: engine.channels,
            sample_rate: cpal::SampleRate(engine.sample_rate),
            buffer_size: match driver.buffer_frames {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };

        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<DriverError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), DriverError>>(1);

        let running_for_loop = running.clone();
        let stream_config = config.clone();
        let input_name = driver.input_device.clone();
        let output_name = driver.output_device.clone();

        let handle = thread::Builder::new()
            .name("intercom-audio".to_string())
            .spawn(move || {
                let streams = open_streams(
                    input_name.as_deref(),
                    output_name.as_deref(),
                    &stream_config,
                    handler,
                    error_tx,
                );

                let _streams = match streams {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        streams
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep streams alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| DriverError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(DriverError::StreamError(
                    "audio thread exited during startup".to_string(),
                ));
            }
        }

        tracing::info!(
            sample_rate = engine.sample_rate,
            channels = engine.channels,
            "Hardware streams running"
        );

        Ok(Self {
            running,
            thread_handle: Some(handle),
            error_rx,
            config,
        })
    }

    /// Stop both streams and join the audio thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Hardware streams stopped");
        }
    }

    /// Check if streams are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check for errors
    pub fn check_errors(&self) -> Option<DriverError> {
        self.error_rx.try_recv().ok()
    }

    /// Get the stream configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for HardwareDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_streams(
    input_name: Option<&str>,
    output_name: Option<&str>,
    config: &StreamConfig,
    handler: Arc<dyn StreamHandler>,
    error_tx: Sender<DriverError>,
) -> Result<(cpal::Stream, cpal::Stream), DriverError> {
    let host = cpal::default_host();
    let input = find_device(&host, input_name, Direction::Input)?;
    let output = find_device(&host, output_name, Direction::Output)?;

    let input_format = input
        .default_input_config()
        .map_err(|e| DriverError::UnsupportedFormat(e.to_string()))?
        .sample_format();
    let output_format = output
        .default_output_config()
        .map_err(|e| DriverError::UnsupportedFormat(e.to_string()))?
        .sample_format();

    tracing::debug!(
        input = %device_name(&input),
        output = %device_name(&output),
        ?input_format,
        ?output_format,
        "Opening hardware streams"
    );

    let capture = match input_format {
        cpal::SampleFormat::I16 => {
            build_capture::<i16>(&input, config, handler.clone(), error_tx.clone())?
        }
        cpal::SampleFormat::F32 => {
            build_capture::<f32>(&input, config, handler.clone(), error_tx.clone())?
        }
        other => return Err(DriverError::UnsupportedFormat(format!("{:?} input", other))),
    };

    let playback = match output_format {
        cpal::SampleFormat::I16 => build_playback::<i16>(&output, config, handler, error_tx)?,
        cpal::SampleFormat::F32 => build_playback::<f32>(&output, config, handler, error_tx)?,
        other => return Err(DriverError::UnsupportedFormat(format!("{:?} output", other))),
    };

    capture
        .play()
        .map_err(|e| DriverError::StreamError(e.to_string()))?;
    playback
        .play()
        .map_err(|e| DriverError::StreamError(e.to_string()))?;

    Ok((capture, playback))
}

fn find_device(
    host: &cpal::Host,
    name: Option<&str>,
    direction: Direction,
) -> Result<cpal::Device, DriverError> {
    let Some(name) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device.ok_or(DriverError::NoDefaultDevice(direction.as_str()));
    };

    let matches_name = |device: &cpal::Device| device.name().map(|n| n == name).unwrap_or(false);
    let found = match direction {
        Direction::Input => host
            .input_devices()
            .map_err(|e| DriverError::StreamError(e.to_string()))?
            .find(matches_name),
        Direction::Output => host
            .output_devices()
            .map_err(|e| DriverError::StreamError(e.to_string()))?
            .find(matches_name),
    };

    found.ok_or_else(|| DriverError::DeviceNotFound(name.to_string()))
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "unknown".to_string())
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    handler: Arc<dyn StreamHandler>,
    error_tx: Sender<DriverError>,
) -> Result<cpal::Stream, DriverError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let mut scratch: Vec<i16> = Vec::with_capacity(SCRATCH_CAPACITY);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| i16::from_sample(s)));
                handler.on_capture(&scratch);
            },
            move |err| {
                let _ = error_tx.try_send(DriverError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| DriverError::StreamError(e.to_string()))
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    handler: Arc<dyn StreamHandler>,
    error_tx: Sender<DriverError>,
) -> Result<cpal::Stream, DriverError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut scratch: Vec<i16> = Vec::with_capacity(SCRATCH_CAPACITY);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0);
                handler.on_playback(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| {
                let _ = error_tx.try_send(DriverError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| DriverError::StreamError(e.to_string()))
}
