//! gigatune CLI — MIDI to Gigatron sound-stream conversion.
//!
//! Usage:
//!   gigatune input.mid output.bin
//!   gigatune input.mid output.bin -d -config instruments.ini

use std::{env, fs, process};

use gt_engine::{build_segments, convert, encode_segments, AllocationPolicy, ConvertOptions};
use gt_formats::{load_smf, parse_macro_config, MacroConfig};
use gt_ir::NUM_VOICES;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <input.mid> <output_file> [options]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d                      Dynamic channel allocation (default: static)");
    eprintln!("  -nv                     Disable velocity changes while a note sounds");
    eprintln!("  -np                     Disable pitch bend and vibrato (semitones only)");
    eprintln!("  -time <seconds>         Maximum duration in seconds (default: unlimited)");
    eprintln!("  -pitch_multiple <value> Pitch bend multiplier (default: 1.0)");
    eprintln!("  -accuracy <levels>      Volume accuracy levels 1-64 (default: 64)");
    eprintln!("  -vl <levels>            Alias for -accuracy");
    eprintln!("  -min_volume <value>     Minimum volume 0-63 (default: 0)");
    eprintln!("  -speed <value>          Playback speed multiplier (default: 1.0)");
    eprintln!("  -ch1wave <wave>         Voice 1 waveform override (-1 = auto)");
    eprintln!("  -ch2wave <wave>         Voice 2 waveform override (-1 = auto)");
    eprintln!("  -ch3wave <wave>         Voice 3 waveform override (-1 = auto)");
    eprintln!("  -ch4wave <wave>         Voice 4 waveform override (-1 = auto)");
    eprintln!("  -config <file>          Instrument macro config file");
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("gigatune")
        .to_string();
    if args.len() < 3 {
        usage(&program);
    }

    let input_path = &args[1];
    let output_path = &args[2];
    let mut opts = ConvertOptions::default();
    let mut config_path: Option<String> = None;

    let take_value = |i: &mut usize| -> String {
        *i += 1;
        match args.get(*i) {
            Some(v) => v.clone(),
            None => usage(&program),
        }
    };

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => opts.policy = AllocationPolicy::Dynamic,
            "-nv" => opts.no_velocity_change = true,
            "-np" => opts.no_pitch_bend = true,
            "-time" => match take_value(&mut i).parse::<f64>() {
                Ok(seconds) if seconds > 0.0 => opts.max_duration_seconds = Some(seconds),
                _ => usage(&program),
            },
            "-pitch_multiple" => match take_value(&mut i).parse::<f64>() {
                Ok(mult) => opts.pitch_bend_multiplier = mult,
                _ => usage(&program),
            },
            "-accuracy" | "-vl" => match take_value(&mut i).parse::<u8>() {
                Ok(levels) if (1..=64).contains(&levels) => opts.volume_levels = levels,
                _ => usage(&program),
            },
            "-min_volume" => match take_value(&mut i).parse::<u8>() {
                Ok(floor) if floor <= 63 => opts.min_volume = floor,
                _ => usage(&program),
            },
            "-speed" => match take_value(&mut i).parse::<f64>() {
                Ok(speed) if speed > 0.0 => opts.speed = speed,
                _ => usage(&program),
            },
            "-config" => config_path = Some(take_value(&mut i)),
            flag => match parse_wave_flag(flag) {
                Some(voice) => match take_value(&mut i).parse::<i32>() {
                    Ok(-1) => opts.forced_waveforms[voice] = None,
                    Ok(wave) if (0..=3).contains(&wave) => {
                        opts.forced_waveforms[voice] = Some(wave as u8)
                    }
                    _ => usage(&program),
                },
                None => {
                    eprintln!("Unknown option: {}", flag);
                    usage(&program);
                }
            },
        }
        i += 1;
    }

    let data = fs::read(input_path).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {}", input_path, e);
        process::exit(1);
    });
    let smf = load_smf(&data).unwrap_or_else(|e| {
        eprintln!("Failed to parse {}: {}", input_path, e);
        process::exit(1);
    });

    let config: Option<MacroConfig> = config_path.map(|path| {
        let text = fs::read_to_string(&path).unwrap_or_else(|e| {
            eprintln!("Failed to read config {}: {}", path, e);
            process::exit(1);
        });
        parse_macro_config(&text)
    });

    println!("Input:    {}", input_path);
    println!("PPQ:      {}", smf.pulses_per_quarter);
    println!("Events:   {}", smf.events.len());

    let records = convert(&smf, config.as_ref(), &opts);
    let segments = build_segments(&records);
    let bytes = encode_segments(&segments);

    println!("Records:  {}", records.len());
    println!("Segments: {}", segments.len());
    println!("Bytes:    {}", bytes.len());

    fs::write(output_path, &bytes).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {}", output_path, e);
        process::exit(1);
    });
    println!("Wrote {}", output_path);
}

/// `-ch1wave` through `-ch4wave`, returning the zero-based voice.
fn parse_wave_flag(flag: &str) -> Option<usize> {
    let rest = flag.strip_prefix("-ch")?.strip_suffix("wave")?;
    let voice: usize = rest.parse().ok()?;
    if (1..=NUM_VOICES).contains(&voice) {
        Some(voice - 1)
    } else {
        None
    }
}
