use app_helpers::barrier::Barrier;
use clap::Parser;
use dab_core::collaborators::{Clock, ControlEvents, SampleSource, SystemClock};
use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_core::events::{DabEvent, DataGroupKind};
use dab_ofdm::dab_ofdm_carrier_map::get_dab_ofdm_carrier_map;
use dab_ofdm::dab_ofdm_parameters::get_dab_ofdm_parameters;
use dab_ofdm::dab_ofdm_phase_reference_symbol::get_dab_ofdm_phase_reference_symbol_fft;
use dab_ofdm::dab_ofdm_tii_patterns::get_dab_tii_pattern_table;
use dab_radio::dab_radio_parameters::{get_dab_radio_parameters, DabRadioParameters};
use dab_radio::eti::{EtiGenerator, FIC_BYTES_PER_CIF};
use dab_radio::fib::configuration::{Configuration, TransportMechanism};
use dab_radio::fic::FicDecoder;
use dab_radio::frame_processor::{FrameProcessor, Mp2FrameProcessor, PacketFrameProcessor, SuperFrameProcessor};
use dab_radio::msc_handler::MscHandler;
use num::complex::Complex32;
use ofdm::ofdm_demodulator::{OfdmDemodulator, OfdmDemodulatorSettings};
use ofdm::sample_reader::SampleReader;
use ofdm::tii_detector::TiiDetector;
use std::io::{BufWriter, Read, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, RwLock};

/// ASCTy value signalling a DAB+ (AAC-LC/LATM) audio component rather than a
/// classic MP2 one (spec §3 "ASCTy"; `original_source/src/backend/backend-driver.cpp`
/// checks `ASCTy != 077`).
const ASCTY_DAB_PLUS: u8 = 0o77;

#[derive(Parser, Debug)]
#[command(author, version, about = "DAB/DAB+ receiver: IQ samples in, decoded audio/data/ETI out", long_about = None)]
struct AppArguments {
    /// DAB transmission mode. Only Mode I is supported by the protocol stack above OFDM.
    #[arg(short, long, default_value_t = 1)]
    mode: u32,
    /// Number of samples to read in chunks from input file.
    #[arg(short, long, default_value_t = 4096 * 8)]
    number_of_input_samples: usize,
    /// Input filepath (raw interleaved u8 I/Q). If not provided uses stdin.
    #[arg(short, long)]
    input_filepath: Option<String>,
    /// Output filepath for decoded interleaved PCM audio (all active audio subchannels, back to
    /// back as they arrive). If not provided uses stdout.
    #[arg(short, long)]
    output_filepath: Option<String>,
    /// Optional filepath to also emit ETI-NI (EN 300 799) frames to.
    #[arg(long)]
    eti_output_filepath: Option<String>,
    /// Correlation peak threshold in dB above the mean noise floor (spec §6 `threshold`).
    #[arg(long, default_value_t = 3.0)]
    threshold: f32,
    /// Number of TII-carrying NULL symbols averaged before a detection pass (spec §6
    /// `tiiFramesToCount`).
    #[arg(long, default_value_t = 5)]
    tii_frames_to_count: usize,
    /// Soft-bit generation mode (spec §6 `softBitType`). Accepted for interface parity with the
    /// original decoder; this demodulator always generates soft bits from the DQPSK phase
    /// difference (see DESIGN.md).
    #[arg(long, default_value_t = 1)]
    soft_bit_type: u8,
    /// Enable the sample reader's DC blocker.
    #[arg(long, default_value_t = false)]
    use_dc_removal: bool,
    /// Enable DC-avoidance local-oscillator offset tuning. Accepted for interface parity; this
    /// demodulator has no VFO-avoidance path of its own (see DESIGN.md).
    #[arg(long, default_value_t = false)]
    use_dc_avoidance: bool,
    /// Lock onto the globally strongest fine-time correlation peak rather than the first one
    /// above threshold. Accepted for interface parity (see DESIGN.md).
    #[arg(long, default_value_t = false)]
    use_strongest_peak: bool,
    /// Report more than one TII pattern per MainId (multiple transmitters sharing a MainId).
    #[arg(long, default_value_t = false)]
    tii_collisions: bool,
    /// TII detection strength threshold, in dB above the mean noise floor.
    #[arg(long, default_value_t = 3)]
    tii_threshold: i32,
    /// Restrict TII reporting to a single SubId (0..23); omit for "any".
    #[arg(long)]
    tii_sub_id: Option<u8>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = AppArguments::parse();

    let transmission_mode = match args.mode {
        1 => DabTransmissionMode::I,
        2 => DabTransmissionMode::II,
        3 => DabTransmissionMode::III,
        4 => DabTransmissionMode::IV,
        mode => anyhow::bail!("invalid transmission mode index {mode}"),
    };
    if args.number_of_input_samples == 0 {
        anyhow::bail!("number of input samples cannot be zero");
    }

    let input: Box<dyn Read + Send + Sync> = match &args.input_filepath {
        None => Box::new(std::io::stdin()),
        Some(filepath) => Box::new(
            std::fs::File::open(filepath).map_err(|err| anyhow::anyhow!("failed to open input file {filepath}: {err}"))?,
        ),
    };
    let output_file: Box<dyn Write + Send> = match &args.output_filepath {
        None => Box::new(BufWriter::new(std::io::stdout())),
        Some(filepath) => Box::new(BufWriter::new(
            std::fs::File::create(filepath).map_err(|err| anyhow::anyhow!("failed to create output file {filepath}: {err}"))?,
        )),
    };
    let eti_file: Option<Box<dyn Write + Send>> = match &args.eti_output_filepath {
        None => None,
        Some(filepath) => Some(Box::new(BufWriter::new(
            std::fs::File::create(filepath).map_err(|err| anyhow::anyhow!("failed to create ETI output file {filepath}: {err}"))?,
        ))),
    };

    // OFDM and DAB-radio parameter tables (spec §3 "Data Model").
    let ofdm_params = get_dab_ofdm_parameters(transmission_mode);
    let radio_params = get_dab_radio_parameters(transmission_mode);
    let mut carrier_map = vec![0usize; ofdm_params.nb_fft_data_carriers];
    let mut prs_fft = vec![Complex32::default(); ofdm_params.nb_fft];
    get_dab_ofdm_carrier_map(&mut carrier_map, ofdm_params.nb_fft);
    get_dab_ofdm_phase_reference_symbol_fft(&mut prs_fft, transmission_mode);

    let mut demodulator = OfdmDemodulator::new(&ofdm_params, &carrier_map, &prs_fft);
    demodulator.settings = OfdmDemodulatorSettings {
        fine_time_impulse_peak_threshold_db: args.threshold,
        ..OfdmDemodulatorSettings::default()
    };
    if args.use_dc_avoidance || args.use_strongest_peak || args.soft_bit_type != 1 {
        log::debug!(
            "use_dc_avoidance/use_strongest_peak/soft_bit_type accepted for CLI parity with the \
             original decoder but have no effect in this demodulator, see DESIGN.md"
        );
    }

    let tii_table = get_dab_tii_pattern_table(ofdm_params.nb_fft);
    let (tx, rx) = mpsc::channel::<DabEvent>();

    // Bridges the reader thread's decoded soft-bit frames to the protocol-decode
    // thread, mirroring the teacher's reader/writer handoff over a shared buffer
    // guarded by a `Barrier` (`app_helpers::barrier::Barrier`), generalized from a
    // raw bit dump to a full frame buffer.
    let frame_buffer: Arc<RwLock<Vec<i8>>> = Arc::new(RwLock::new(vec![0i8; ofdm_params.nb_output_bits]));
    let frame_barrier = Arc::new(Barrier::new(false));

    demodulator.subscribe_bits_out({
        let frame_buffer = frame_buffer.clone();
        let frame_barrier = frame_barrier.clone();
        move |bits: &[i8]| {
            frame_buffer.write().unwrap().copy_from_slice(bits);
            if let Err(err) = frame_barrier.acquire().set(true) {
                log::error!("frame handoff barrier stopped responding: {err:?}");
            }
        }
    });

    demodulator.subscribe_null_symbol_out({
        let mut detector = TiiDetector::new(ofdm_params.nb_fft, args.tii_frames_to_count.max(1));
        let mut tx = tx.clone();
        let tii_threshold = args.tii_threshold as f32;
        let tii_collisions = args.tii_collisions;
        let tii_sub_id = args.tii_sub_id;
        move |null_symbol: &[Complex32]| {
            if detector.accumulate(null_symbol) {
                let mut detections = detector.analyze(&tii_table, tii_threshold, tii_collisions);
                if let Some(wanted) = tii_sub_id {
                    detections.retain(|d| d.sub_id == wanted);
                }
                detector.reset();
                if !detections.is_empty() {
                    tx.emit(DabEvent::Tii { detections });
                }
            }
        }
    });

    let protocol_thread = std::thread::spawn({
        let frame_buffer = frame_buffer.clone();
        let frame_barrier = frame_barrier.clone();
        move || run_protocol_pipeline(radio_params, frame_buffer, frame_barrier, tx, rx, output_file, eti_file)
    });

    run_sample_loop(input, args.number_of_input_samples, args.use_dc_removal, demodulator);

    if let Err(err) = frame_barrier.acquire().close() {
        log::debug!("frame handoff barrier already closed: {err:?}");
    }
    if let Err(err) = protocol_thread.join() {
        log::error!("protocol thread panicked: {err:?}");
    }

    Ok(())
}

/// Pulls samples from the input and feeds them through the OFDM demodulator until
/// end of stream (spec §4.1 "Sample Reader"). All downstream work happens
/// synchronously inside `subscribe_bits_out`/`subscribe_null_symbol_out` callbacks,
/// invoked from within `process()`.
fn run_sample_loop(
    input: Box<dyn Read + Send + Sync>,
    number_of_input_samples: usize,
    use_dc_removal: bool,
    mut demodulator: OfdmDemodulator,
) {
    let mut sample_reader = SampleReader::new(input, 2_048_000.0, true);
    sample_reader.set_dc_removal(use_dc_removal);
    let mut samples = Vec::with_capacity(number_of_input_samples);
    loop {
        match sample_reader.pull(number_of_input_samples, &mut samples) {
            Ok(0) => break,
            Ok(_) => demodulator.process(&samples),
            Err(dab_core::error::DabError::ReaderStopped) => {
                log::info!("reached end of input stream");
                break;
            }
            Err(err) => {
                log::warn!("sample source stopped: {err}");
                break;
            }
        }
    }
}

/// Owns the FIC/MSC/frame-processor/ETI pipeline (spec §4.6-§4.15). Runs on its own
/// thread, woken each time `run_sample_loop`'s demodulator callback hands off a
/// complete frame's soft bits.
fn run_protocol_pipeline(
    radio_params: DabRadioParameters,
    frame_buffer: Arc<RwLock<Vec<i8>>>,
    frame_barrier: Arc<Barrier<bool>>,
    tx: Sender<DabEvent>,
    rx: Receiver<DabEvent>,
    mut output_file: Box<dyn Write + Send>,
    mut eti_file: Option<Box<dyn Write + Send>>,
) {
    let clock = SystemClock::default();
    let mut fic_decoder = FicDecoder::new(radio_params);
    let mut msc_handler = MscHandler::new(&radio_params);
    let mut eti_generator = eti_file.as_ref().map(|_| EtiGenerator::new());
    let mut enrolled_sub_ch_ids: Vec<u8> = Vec::new();
    let mut frame_i16 = vec![0i16; radio_params.nb_bits_per_frame];

    loop {
        let mut tx_sink = tx.clone();
        match frame_barrier.wait(|full| *full) {
            Err(err) => {
                log::info!("protocol pipeline shutting down: {err:?}");
                break;
            }
            Ok(()) => {}
        }
        {
            let bits = frame_buffer.read().unwrap();
            for (dst, &src) in frame_i16.iter_mut().zip(bits.iter()) {
                *dst = src as i16;
            }
        }
        if let Err(err) = frame_barrier.acquire().set(false) {
            log::debug!("frame handoff barrier closed mid-cycle: {err:?}");
        }

        let (fic_bits, msc_bits) = frame_i16.split_at(radio_params.nb_bits_in_fic);
        fic_decoder.decode_fic(fic_bits, &mut tx_sink, &clock);

        let config = fic_decoder.fib_parser.current().clone();
        reconcile_subchannels(&config, &mut msc_handler, &mut enrolled_sub_ch_ids);
        if let Some(generator) = eti_generator.as_mut() {
            generator.sync_subchannels(&config.subchannels);
        }

        for block in msc_bits.chunks_exact(radio_params.nb_bits_per_symbol) {
            msc_handler.process_block(block, &config.subchannels, &mut tx_sink, &clock);
        }

        if let (Some(generator), Some(file)) = (eti_generator.as_mut(), eti_file.as_mut()) {
            for (fic_idx, cif) in msc_bits.chunks_exact(radio_params.nb_bits_per_cif).enumerate() {
                let mut fic_fib_bundle = [0u8; FIC_BYTES_PER_CIF];
                let bundle = fic_decoder.fic_bundle(fic_idx);
                let copy_len = bundle.len().min(FIC_BYTES_PER_CIF);
                fic_fib_bundle[..copy_len].copy_from_slice(&bundle[..copy_len]);
                let eti_frame = generator.build_frame(&fic_fib_bundle, cif, &config.subchannels);
                if let Err(err) = file.write_all(&eti_frame) {
                    log::error!("failed to write ETI frame: {err}");
                }
            }
        }

        drain_events(&rx, &mut output_file);
    }
    drain_events(&rx, &mut output_file);
}

fn drain_events(rx: &Receiver<DabEvent>, output_file: &mut Box<dyn Write + Send>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            DabEvent::NewAudio { subch_id, samples, rate_hz, flags } => {
                log::trace!("subch {subch_id}: {} samples @ {rate_hz}Hz (sbr={}, ps={})", samples.len(), flags.sbr, flags.ps);
                let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                if let Err(err) = output_file.write_all(&bytes) {
                    log::error!("failed to write decoded audio: {err}");
                }
            }
            DabEvent::NewDataGroup { subch_id, kind, bytes } => {
                log::debug!("subch {subch_id}: new {kind:?} data group, {} bytes", bytes.len());
            }
            DabEvent::MotObject { transport_id, name, content_type, bytes, in_directory } => {
                log::info!("MOT object {transport_id}: {name} (content_type={content_type}, {} bytes, in_directory={in_directory})", bytes.len());
            }
            DabEvent::DynamicLabel { subch_id, text } => {
                log::info!("subch {subch_id} dynamic label: {text}");
            }
            DabEvent::FibLoaded { stage } => log::debug!("FIB load stage reached: {stage:?}"),
            DabEvent::NoSignal => log::warn!("no signal: NULL symbol detection failed 8 times in a row"),
            DabEvent::Tii { detections } => {
                for d in detections {
                    log::info!("TII MainId={} SubId={} strength={:.1}dB phase={:.1}deg", d.main_id, d.sub_id, d.strength_db, d.phase_deg);
                }
            }
            DabEvent::ServiceAdded { sid, label } => log::info!("service added: SId={sid:#x} \"{label}\""),
            DabEvent::ConfigurationChanged => log::debug!("multiplex configuration changed"),
            DabEvent::ReaderStopped => log::info!("sample reader stopped"),
        }
    }
    let _ = output_file.flush();
}

/// Diffs the live [`Configuration`]'s stream-audio/packet-data components against
/// the currently enrolled subchannel set and enrolls/retires backends accordingly
/// (spec §4.8 "manages start/stop of backends by SubChId").
fn reconcile_subchannels(config: &Configuration, msc_handler: &mut MscHandler, enrolled: &mut Vec<u8>) {
    let wanted: Vec<u8> = config
        .subchannels
        .iter()
        .filter(|s| s.bit_rate > 0 && component_for_subchannel(config, s.sub_ch_id).is_some())
        .map(|s| s.sub_ch_id)
        .collect();

    enrolled.retain(|id| {
        if wanted.contains(id) {
            true
        } else {
            msc_handler.stop_channel(*id);
            false
        }
    });

    for descriptor in &config.subchannels {
        if !wanted.contains(&descriptor.sub_ch_id) || enrolled.contains(&descriptor.sub_ch_id) {
            continue;
        }
        let Some(processor) = build_frame_processor(config, descriptor) else {
            continue;
        };
        msc_handler.set_channel(descriptor, processor);
        enrolled.push(descriptor.sub_ch_id);
    }
}

fn component_for_subchannel(config: &Configuration, sub_ch_id: u8) -> Option<TransportMechanism> {
    config
        .components
        .iter()
        .find(|c| matches!(c.tmid, TransportMechanism::StreamAudio | TransportMechanism::StreamData) && c.subch_or_scid == sub_ch_id as u16)
        .map(|c| c.tmid)
        .or_else(|| {
            config.packet_descriptions.iter().find(|p| p.sub_ch_id == sub_ch_id).map(|_| TransportMechanism::PacketData)
        })
}

/// Selects the frame processor kind for a subchannel from its `TransportMechanism`/
/// `ASCTy`/`DSCTy` (spec §4.9's routing rule).
fn build_frame_processor(config: &Configuration, descriptor: &dab_radio::fib::configuration::SubchannelDescriptor) -> Option<FrameProcessor> {
    let sub_ch_id = descriptor.sub_ch_id;
    if let Some(component) = config.components.iter().find(|c| c.tmid == TransportMechanism::StreamAudio && c.subch_or_scid == sub_ch_id as u16) {
        return Some(if component.ascty_or_dscty == ASCTY_DAB_PLUS {
            FrameProcessor::Mp4(SuperFrameProcessor::new(sub_ch_id, descriptor.bit_rate))
        } else {
            FrameProcessor::Mp2(Mp2FrameProcessor::new(sub_ch_id, descriptor.bit_rate))
        });
    }
    if let Some(packet_desc) = config.packet_descriptions.iter().find(|p| p.sub_ch_id == sub_ch_id) {
        let kind = data_group_kind_for_dsc_ty(packet_desc.dsc_ty);
        return Some(FrameProcessor::Packet(PacketFrameProcessor::new(sub_ch_id).with_address(packet_desc.packet_address, kind)));
    }
    None
}

/// Maps FIG 0/3's `DSCTy` to the coarse [`DataGroupKind`] the rest of the crate
/// deals in (spec §3 "Packet-Mode Description"); AppType-level discrimination
/// within DSCTy 5 (TDC vs ADV vs Journaline, `data-processor.cpp`) isn't modeled,
/// so DSCTy 5 is reported as TDC, the common case.
fn data_group_kind_for_dsc_ty(dsc_ty: u8) -> DataGroupKind {
    match dsc_ty {
        60 => DataGroupKind::Mot,
        59 => DataGroupKind::Ip,
        44 => DataGroupKind::Journaline,
        5 => DataGroupKind::Tdc,
        _ => DataGroupKind::Epg,
    }
}
