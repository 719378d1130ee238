use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ProjectId;
use crate::transform;

/// Connect, join, and work until the project completes or the server drops
/// the connection.
pub async fn run_worker(config: WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let project_id = ProjectId(Uuid::parse_str(&config.project_id)?);

    let (ws, _) = connect_async(config.server_url.as_str()).await?;
    let (mut write, mut read) = ws.split();

    let join = ClientEvent::Join {
        project_id,
        capacity: config.capacity,
    };
    write
        .send(Message::Text(serde_json::to_string(&join)?.into()))
        .await?;
    tracing::info!(project_id = %project_id, capacity = config.capacity, "Joined project");

    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => {
                let event = match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unrecognized server frame dropped");
                        continue;
                    }
                };

                match event {
                    ServerEvent::JobDispatched {
                        job_id,
                        payload,
                        map,
                    } => match transform::apply_map(&map, &payload) {
                        Ok(result) => {
                            tracing::debug!(job_id = %job_id, "Job finished");
                            let done = ClientEvent::JobDone { job_id, result };
                            write
                                .send(Message::Text(serde_json::to_string(&done)?.into()))
                                .await?;
                        }
                        Err(e) => {
                            // Leave the job unanswered; it is requeued for
                            // another agent when this connection drops.
                            tracing::error!(job_id = %job_id, error = %e, "Transform failed, job abandoned");
                        }
                    },
                    ServerEvent::WorkerList { workers } => {
                        tracing::info!(workers = workers.len(), "Worker list updated");
                    }
                    ServerEvent::ResultsSnapshot { results } => {
                        tracing::debug!(completed = results.len(), "Results snapshot received");
                    }
                    ServerEvent::ProjectComplete { final_result } => {
                        tracing::info!(final_result = %final_result, "Project complete");
                        println!("{final_result}");
                        break;
                    }
                    ServerEvent::ProjectCreated { project_id } => {
                        tracing::debug!(project_id = %project_id, "Project created");
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!(message = %message, "Server rejected request");
                        return Err(message.into());
                    }
                }
            }
            Message::Close(_) => {
                tracing::info!("Server closed the connection");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
