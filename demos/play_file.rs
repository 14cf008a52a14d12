use beatline::{AudioPlayer, OutputDevice, PlayerDesc, load_pcm};
use std::time::Duration;

/// Play a song file through the mixer, optionally firing a sound effect
/// every half second, and print the published song clock offset.
///
/// Usage: play_file <song> [effect]
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let song_path = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: play_file <song> [effect]"))?;
    let effect_path = args.next();

    let desc = PlayerDesc::default();
    let mut player = AudioPlayer::new(desc)?;
    player.start_stream(OutputDevice::Default)?;

    let effect = match &effect_path {
        Some(path) => Some(load_pcm(path, &player.desc().stream_spec())?),
        None => None,
    };

    println!("Loading {song_path}...");
    player.load_song(&song_path, false)?;
    player.resume_song()?;

    for i in 0..20 {
        std::thread::sleep(Duration::from_millis(500));

        if let Some(effect) = &effect {
            player.play_sound_effect(effect.clone());
        }

        match player.song_clock_offset() {
            Some(offset) => println!("tick {i:2}: song started at t = {offset:.4}s"),
            None => println!("tick {i:2}: clock not resolved yet"),
        }

        if !player.is_song_playing() {
            println!("song finished");
            break;
        }
    }

    player.stop_stream();
    Ok(())
}
