//! AI Manager
//!
//! Runs on its own dedicated thread at its own tick rate, updating agent
//! steering state independently of the frame loop. The kernel only
//! publishes elapsed time; commands and results cross the thread boundary
//! on message channels (the navmesh/path algorithm itself is an external
//! collaborator).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use glam::Vec3;
use log::warn;
use rustc_hash::FxHashMap;

use crate::core::guid::Guid;

/// Commands the main thread may send to the AI thread.
pub enum AiMessage {
    AddAgent {
        agent: Guid,
        position: Vec3,
        speed: f32,
    },
    SetTarget {
        agent: Guid,
        target: Vec3,
    },
    RemoveAgent(Guid),
}

enum Command {
    Message(AiMessage),
    Elapsed(u64),
    Shutdown,
}

/// A position update produced by one AI tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentUpdate {
    pub agent: Guid,
    pub position: Vec3,
    pub arrived: bool,
}

struct Agent {
    position: Vec3,
    target: Option<Vec3>,
    speed: f32,
}

/// Threaded agent-state manager.
pub struct AiManager {
    commands: flume::Sender<Command>,
    updates: flume::Receiver<AgentUpdate>,
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
}

impl AiManager {
    /// Spawns the AI thread ticking at `tick_hz`.
    #[must_use]
    pub fn new(tick_hz: u32) -> Self {
        let (cmd_tx, cmd_rx) = flume::unbounded::<Command>();
        let (update_tx, update_rx) = flume::unbounded::<AgentUpdate>();
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));

        let tick_interval = Duration::from_micros(1_000_000 / u64::from(tick_hz.max(1)));
        let thread_running = Arc::clone(&running);
        let thread_ticks = Arc::clone(&ticks);

        let thread = std::thread::Builder::new()
            .name("divide-ai".to_string())
            .spawn(move || {
                let mut agents: FxHashMap<Guid, Agent> = FxHashMap::default();
                let mut pending_us: u64 = 0;
                let mut last_tick = Instant::now();

                'run: loop {
                    // Drain commands, waiting at most one tick interval.
                    match cmd_rx.recv_timeout(tick_interval) {
                        Ok(Command::Shutdown) | Err(flume::RecvTimeoutError::Disconnected) => {
                            break 'run;
                        }
                        Ok(Command::Elapsed(us)) => pending_us += us,
                        Ok(Command::Message(message)) => {
                            apply_message(&mut agents, message);
                        }
                        Err(flume::RecvTimeoutError::Timeout) => {}
                    }
                    while let Ok(command) = cmd_rx.try_recv() {
                        match command {
                            Command::Shutdown => break 'run,
                            Command::Elapsed(us) => pending_us += us,
                            Command::Message(message) => apply_message(&mut agents, message),
                        }
                    }

                    if last_tick.elapsed() < tick_interval && pending_us == 0 {
                        continue;
                    }
                    let dt = (pending_us as f32 / 1_000_000.0)
                        .max(last_tick.elapsed().as_secs_f32());
                    pending_us = 0;
                    last_tick = Instant::now();

                    for (guid, agent) in &mut agents {
                        let Some(target) = agent.target else {
                            continue;
                        };
                        let to_target = target - agent.position;
                        let step = agent.speed * dt;
                        let arrived = to_target.length_squared() <= step * step;
                        agent.position = if arrived {
                            agent.target = None;
                            target
                        } else {
                            agent.position + to_target.normalize_or_zero() * step
                        };
                        let _ = update_tx.send(AgentUpdate {
                            agent: *guid,
                            position: agent.position,
                            arrived,
                        });
                    }
                    thread_ticks.fetch_add(1, Ordering::Relaxed);
                }
                thread_running.store(false, Ordering::Release);
            })
            .expect("ai thread spawn");

        Self {
            commands: cmd_tx,
            updates: update_rx,
            thread: Some(thread),
            running,
            ticks,
        }
    }

    /// Publishes logic-tick time to the AI thread (called by the kernel).
    pub fn publish_elapsed(&self, elapsed_us: u64) {
        let _ = self.commands.send(Command::Elapsed(elapsed_us));
    }

    /// Sends a command to the AI thread.
    pub fn send(&self, message: AiMessage) {
        let _ = self.commands.send(Command::Message(message));
    }

    /// Drains position updates produced since the last poll. The
    /// navigation system applies these to the scene on the main thread.
    pub fn poll_updates(&self) -> Vec<AgentUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            updates.push(update);
        }
        updates
    }

    /// AI ticks executed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the thread, joining with a timeout.
    pub fn shutdown(&mut self, timeout: Duration) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let deadline = Instant::now() + timeout;
            while self.running.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            if self.running.load(Ordering::Acquire) {
                warn!("AI thread did not stop within {timeout:?}; detaching");
            } else {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for AiManager {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

fn apply_message(agents: &mut FxHashMap<Guid, Agent>, message: AiMessage) {
    match message {
        AiMessage::AddAgent {
            agent,
            position,
            speed,
        } => {
            agents.insert(
                agent,
                Agent {
                    position,
                    target: None,
                    speed: speed.max(0.01),
                },
            );
        }
        AiMessage::SetTarget { agent, target } => {
            if let Some(state) = agents.get_mut(&agent) {
                state.target = Some(target);
            }
        }
        AiMessage::RemoveAgent(agent) => {
            agents.remove(&agent);
        }
    }
}
