use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use crate::config::SimulatorTiming;
use crate::protocol::{ECHO_MARKER, END_FILE_MARKER, START_FILE_MARKER};

const LINK_BUFFER: usize = 64 * 1024;

/// One timed write from the fake device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    /// Pause before the line is written
    pub delay: Duration,
    pub line: String,
}

impl ScriptStep {
    pub fn new(delay: Duration, line: impl Into<String>) -> Self {
        Self {
            delay,
            line: line.into(),
        }
    }

    pub fn immediate(line: impl Into<String>) -> Self {
        Self::new(Duration::ZERO, line)
    }
}

/// Lines the simulated device plays back after each command it receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceScript {
    steps: Vec<ScriptStep>,
}

impl DeviceScript {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    /// A single-instance run: one progress tick, one solution file, then the
    /// completion line.
    pub fn standard(timing: &SimulatorTiming) -> Self {
        let mut steps = vec![
            ScriptStep::new(
                Duration::from_millis(timing.progress_delay_ms),
                "Problem 1 Complete",
            ),
            ScriptStep::new(
                Duration::from_millis(timing.file_delay_ms),
                format!("{}data_out_uf50-01.csv", START_FILE_MARKER),
            ),
        ];
        steps.extend(["1,", "0,", "1,", "0,", "1,"].map(ScriptStep::immediate));
        steps.push(ScriptStep::immediate(END_FILE_MARKER));
        steps.push(ScriptStep::new(
            Duration::from_millis(timing.finish_delay_ms),
            "COMPLETE: Test finished",
        ));
        Self { steps }
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.line.as_str())
    }

    /// Sum of all delays in one playback.
    pub fn duration(&self) -> Duration {
        self.steps.iter().map(|s| s.delay).sum()
    }
}

/// In-process stand-in for the accelerator.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    script: DeviceScript,
}

impl SimulatedDevice {
    pub fn new(script: DeviceScript) -> Self {
        Self { script }
    }

    /// Start the device task and return the host end of the link.
    pub fn spawn(self) -> DuplexStream {
        let (host, device) = tokio::io::duplex(LINK_BUFFER);
        tokio::spawn(async move {
            if let Err(e) = self.run(device).await {
                tracing::debug!(error = %e, "Simulated device stopped");
            }
        });
        host
    }

    async fn run(self, link: DuplexStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = tokio::io::split(link);
        let mut commands = BufReader::new(read_half).lines();

        while let Some(command) = commands.next_line().await? {
            let command = command.trim_end_matches('\r');
            tracing::debug!(command, "Simulated device received command");

            let echo = format!("{} {}\n", ECHO_MARKER, command);
            write_half.write_all(echo.as_bytes()).await?;

            for step in &self.script.steps {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                write_half.write_all(step.line.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
            }
            write_half.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_script_shape() {
        let script = DeviceScript::standard(&SimulatorTiming::default());
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Problem 1 Complete",
                "START_FILE:data_out_uf50-01.csv",
                "1,",
                "0,",
                "1,",
                "0,",
                "1,",
                "END_FILE",
                "COMPLETE: Test finished",
            ]
        );
        assert_eq!(script.duration(), Duration::from_secs(4));
    }

    #[test]
    fn immediate_timing_has_no_delay() {
        let script = DeviceScript::standard(&SimulatorTiming::immediate());
        assert_eq!(script.duration(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn device_echoes_then_plays_script() {
        let script = DeviceScript::new(vec![
            ScriptStep::new(Duration::from_secs(1), "Problem 1 Complete"),
            ScriptStep::immediate("COMPLETE: Test finished"),
        ]);
        let link = SimulatedDevice::new(script).spawn();
        let (read_half, mut write_half) = tokio::io::split(link);
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"TEST custom f 1 1\n").await.unwrap();

        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("ECHO: TEST custom f 1 1")
        );
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("Problem 1 Complete")
        );
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("COMPLETE: Test finished")
        );
    }
}
