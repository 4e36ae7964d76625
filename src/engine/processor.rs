use crate::engine::components::echo::{echo_bus, EchoBus, EchoBusProcessor, EchoBusState};
use crate::engine::components::master::{master_bus, MasterBus, MasterBusProcessor, MasterState};
use crate::engine::components::reverb::{
    reverb_bus, ConvolverKernel, ReverbBus, ReverbBusProcessor, ReverbBusState,
};
use crate::engine::components::transport::LoopState;
use crate::engine::components::MixPoint;
use crate::engine::info::Info;
use crate::engine::session::SessionProcessor;
use crate::engine::utils::dropper::DBox;
use crate::engine::utils::ringbuffer::{ringbuffer, Receiver, Sender};
use crate::engine::{Sample, CHANNELS};

/// Commands travelling from the [`ProcessorInterface`] to the [`Processor`].
pub(crate) enum Event {
    /// Swap in the processor half of a newly loaded song, or `None` to eject.
    ReplaceSession(Option<DBox<SessionProcessor>>),
    JumpTo(usize),
    SetLoop(LoopState),
    SwapReverbKernel(DBox<ConvolverKernel>),
}

/// Creates a corresponding pair of [`ProcessorInterface`] and [`Processor`].
///
/// The [`Processor`] should live on the audio thread, while the [`ProcessorInterface`] should not.
pub(crate) fn processor(sample_rate: u32, max_buffer_size: usize) -> (ProcessorInterface, Processor) {
    let (sender, receiver) = ringbuffer();

    let (master, master_processor) =
        master_bus(&MasterState::default(), sample_rate, max_buffer_size);
    let (reverb, reverb_processor) =
        reverb_bus(&ReverbBusState::default(), sample_rate, max_buffer_size);
    let (echo, echo_processor) = echo_bus(&EchoBusState::default(), sample_rate, max_buffer_size);

    (
        ProcessorInterface {
            master,
            reverb,
            echo,
            sender,
        },
        Processor {
            sample_rate,
            max_buffer_size,

            session: None,
            reverb: reverb_processor,
            echo: echo_processor,
            master: master_processor,

            send_a: vec![0.0; max_buffer_size * CHANNELS],
            send_b: vec![0.0; max_buffer_size * CHANNELS],
            mix_point: MixPoint::new(max_buffer_size),

            receiver,

            #[cfg(feature = "record_output")]
            recorder: crate::engine::components::capture::WavRecorder::new(
                CHANNELS as u16,
                sample_rate,
            ),
        },
    )
}

/// The controller half of the audio pipeline: the effect buses and the master bus.
///
/// Acquired via the [`processor`] function.
pub(crate) struct ProcessorInterface {
    pub master: MasterBus,
    pub reverb: ReverbBus,
    pub echo: EchoBus,

    sender: Sender<Event>,
}
impl ProcessorInterface {
    pub fn send(&mut self, event: Event) {
        self.sender.send(event);
    }
}

/// Contains all data that should persist from one buffer output to the next.
pub struct Processor {
    sample_rate: u32,
    max_buffer_size: usize,

    session: Option<DBox<SessionProcessor>>,
    reverb: ReverbBusProcessor,
    echo: EchoBusProcessor,
    master: MasterBusProcessor,

    send_a: Vec<Sample>,
    send_b: Vec<Sample>,
    mix_point: MixPoint,

    receiver: Receiver<Event>,

    #[cfg(feature = "record_output")]
    recorder: crate::engine::components::capture::WavRecorder,
}
impl Processor {
    /// Handle all commands that have arrived since the last poll.
    pub fn poll(&mut self) {
        for event in self.receiver.iter_bound() {
            match event {
                Event::ReplaceSession(session) => {
                    // The old session is dropped off-thread via its DBox
                    self.session = session;
                }
                Event::JumpTo(frame) => {
                    if let Some(session) = &mut self.session {
                        session.jump_to(frame);
                    }
                }
                Event::SetLoop(loop_state) => {
                    if let Some(session) = &mut self.session {
                        session.set_loop_state(loop_state);
                    }
                }
                Event::SwapReverbKernel(kernel) => {
                    self.reverb.swap_kernel(kernel);
                }
            }
        }
    }

    /// Convert the output of [`Self::output_samples`] to the format requested by the device.
    pub fn output<T: cpal::SizedSample + cpal::FromSample<Sample>>(&mut self, data: &mut [T]) {
        let buffer_size = data.len() / CHANNELS;

        let buffer = self.output_samples(buffer_size);

        for (&sample, out) in buffer.iter().zip(data.iter_mut()) {
            *out = T::from_sample(sample);
        }
    }

    /// Render the next `buffer_size` frames of the full pipeline:
    /// session channels, effect returns, then the master bus.
    pub fn output_samples(&mut self, buffer_size: usize) -> &mut [Sample] {
        debug_assert!(
            buffer_size <= self.max_buffer_size,
            "A buffer of size {} was requested, while the max buffer size is {}",
            buffer_size,
            self.max_buffer_size
        );

        let info = Info::new(self.sample_rate, buffer_size);
        let sample_count = buffer_size * CHANNELS;

        self.send_a[..sample_count].fill(0.0);
        self.send_b[..sample_count].fill(0.0);
        self.mix_point.reset();

        if let Some(session) = &mut self.session {
            session.process(
                &info,
                &mut self.send_a[..sample_count],
                &mut self.send_b[..sample_count],
                &mut self.mix_point,
            );
        }

        // The buses keep running while no song is loaded, so their tails ring out
        let reverb_return = self.reverb.process(&info, &self.send_a[..sample_count]);
        self.mix_point.add(reverb_return);
        let echo_return = self.echo.process(&info, &self.send_b[..sample_count]);
        self.mix_point.add(echo_return);

        let buffer = self.mix_point.output(buffer_size);
        self.master.process(&info, buffer);
        clip(buffer);

        #[cfg(feature = "record_output")]
        self.recorder.record(buffer);

        buffer
    }
}

/// Hard-limits the output to the [-1.0, 1.0] range expected by the device.
fn clip(buffer: &mut [Sample]) {
    for sample in buffer.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_session_outputs_silence() {
        let (_interface, mut processor) = processor(48_000, 1024);

        processor.poll();
        let buffer = processor.output_samples(1024);

        assert!(buffer.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn output_is_clipped() {
        let mut buffer = [2.0, -3.0, 0.5];
        clip(&mut buffer);
        assert_eq!(buffer, [1.0, -1.0, 0.5]);
    }
}
