// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Logs every chunk written to stdin until EOF, using a `DescriptorWatcher`.

use std::fs::File;
use std::io;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use argh::FromArgs;
use base::clone_descriptor;
use base::error;
use base::info;
use base::syslog;
use base::AsRawDescriptor;
use base::Descriptor;
use base::FromRawDescriptor;
use fdwatch::CallbackFlags;
use fdwatch::DescriptorWatcher;
use fdwatch::RunLoop;
use fdwatch::RunLoopConfig;
use fdwatch::RunLoopHandle;
use fdwatch::WatcherContext;

const READ_CHUNK: usize = 4096;

#[derive(FromArgs)]
/// Watch stdin and log whatever arrives on it until EOF.
struct Args {
    /// path to a JSON run loop configuration
    #[argh(option)]
    config: Option<PathBuf>,

    /// log filter, e.g. "debug" or "fdwatch=trace"
    #[argh(option)]
    log: Option<String>,

    /// poll timeout of the run loop in milliseconds
    #[argh(option)]
    timeout_ms: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<RunLoopConfig> {
    let mut cfg = match &args.config {
        Some(path) => RunLoopConfig::from_file(path)?,
        None => RunLoopConfig::default(),
    };
    if let Some(filter) = &args.log {
        cfg.log_filter = filter.clone();
    }
    if args.timeout_ms.is_some() {
        cfg.poll_timeout_ms = args.timeout_ms;
    }
    Ok(cfg)
}

fn log_chunk(chunk: &[u8], bytes_seen: &AtomicUsize) {
    bytes_seen.fetch_add(chunk.len(), Ordering::Relaxed);
    info!(
        "read {} bytes: {:?}",
        chunk.len(),
        String::from_utf8_lossy(chunk)
    );
}

/// Reads `input` to EOF without a run loop, for stdin that epoll can't watch.
fn read_until_eof(mut input: impl Read, bytes_seen: &AtomicUsize) -> io::Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match base::handle_eintr!(input.read(&mut buf))? {
            0 => return Ok(()),
            n => log_chunk(&buf[..n], bytes_seen),
        }
    }
}

fn on_stdin_ready(
    input: &mut File,
    watcher: &DescriptorWatcher,
    bytes_seen: &AtomicUsize,
    run_loop: &RunLoopHandle,
) {
    let mut buf = [0u8; READ_CHUNK];
    match input.read(&mut buf) {
        Ok(0) => {
            info!(
                "stdin closed after {} bytes",
                bytes_seen.load(Ordering::Relaxed)
            );
            watcher.invalidate();
            if let Err(e) = run_loop.stop() {
                error!("failed to stop the run loop: {}", e);
            }
        }
        Ok(n) => {
            log_chunk(&buf[..n], bytes_seen);
            watcher.enable_callbacks(CallbackFlags::READ);
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
            watcher.enable_callbacks(CallbackFlags::READ);
        }
        Err(e) => {
            error!("failed to read stdin: {}", e);
            watcher.invalidate();
            if let Err(e) = run_loop.stop() {
                error!("failed to stop the run loop: {}", e);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let cfg = load_config(&args)?;

    syslog::init_with(syslog::LogConfig {
        filter: Some(cfg.log_filter.clone()),
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    let run_loop = RunLoop::with_config(&cfg).context("failed to create the run loop")?;
    let handle = run_loop.handle();

    // Read through a duplicate so std's buffered stdin can't hold data the poller doesn't see.
    let dup = clone_descriptor(&io::stdin()).context("failed to duplicate stdin")?;
    // SAFETY: `dup` was just created and is owned by nothing else.
    let mut input = unsafe { File::from_raw_descriptor(dup) };

    let bytes_seen = Arc::new(AtomicUsize::new(0));
    let counter = bytes_seen.clone();
    let context = WatcherContext::from_info(bytes_seen.clone())
        .with_describe(|info| match info.downcast_ref::<AtomicUsize>() {
            Some(n) => format!("stdin reader ({} bytes)", n.load(Ordering::Relaxed)),
            None => "stdin reader".to_string(),
        });
    let watcher = DescriptorWatcher::new(
        &Descriptor(input.as_raw_descriptor()),
        move |w, _flags, _info| on_stdin_ready(&mut input, w, &counter, &handle),
        context,
    )
    .context("failed to watch stdin")?;

    // Enabled before attaching so a descriptor epoll refuses fails here instead of never firing.
    watcher.enable_callbacks(CallbackFlags::READ);
    match run_loop.add_source(&watcher.create_run_loop_source(0)) {
        Ok(()) => {
            info!("watching {}", watcher);
            run_loop.run().context("run loop failed")?;
        }
        // Regular files are always ready, and epoll rejects them.
        Err(fdwatch::Error::Register(_, e)) if e.errno() == libc::EPERM => {
            info!("stdin can't be polled, reading it directly");
            watcher.invalidate();
            read_until_eof(io::stdin().lock(), &bytes_seen).context("failed to read stdin")?;
        }
        Err(e) => return Err(e).context("failed to attach stdin to the run loop"),
    }
    info!("done, {} bytes total", bytes_seen.load(Ordering::Relaxed));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::io::Seek;
    use std::io::Write;

    use super::*;

    #[test]
    fn direct_read_counts_all_bytes() {
        let bytes_seen = AtomicUsize::new(0);
        let data = vec![b'x'; READ_CHUNK * 2 + 7];
        read_until_eof(Cursor::new(data), &bytes_seen).unwrap();
        assert_eq!(bytes_seen.load(Ordering::Relaxed), READ_CHUNK * 2 + 7);
    }

    #[test]
    fn direct_read_of_regular_file() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"hello").unwrap();
        file.rewind().unwrap();
        let bytes_seen = AtomicUsize::new(0);
        read_until_eof(file, &bytes_seen).unwrap();
        assert_eq!(bytes_seen.load(Ordering::Relaxed), 5);
    }
}
