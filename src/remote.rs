//! Remote simulation state
//!
//! The server runs the authoritative multi-chamber simulation and publishes
//! snapshots as JSON. A snapshot carries, per chamber id, the balls inside it
//! and the chamber's serialized render state; the host loads that state into
//! its own chamber instance and draws.

use serde::{Deserialize, Serialize};

use crate::chamber::SerializedState;
use crate::module::Ball;

/// Grid parameters fetched once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitInfo {
    pub chamber_height: f32,
    pub chambers_per_row: usize,
    pub num_balls: usize,
    /// Chamber binaries to instantiate, in grid order
    pub chamber_ids: Vec<usize>,
}

/// State of one remote chamber
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChamberSnapshot {
    pub balls: Vec<Ball>,
    #[serde(default)]
    pub state: SerializedState,
}

/// One published simulation frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub num_steps_taken: u64,
    /// Indexed by chamber id
    pub chambers: Vec<ChamberSnapshot>,
    /// Balls in grid cells without a chamber, indexed by cell
    #[serde(default)]
    pub cell_balls: Vec<Vec<Ball>>,
}

impl SimulationSnapshot {
    pub fn chamber(&self, id: usize) -> Option<&ChamberSnapshot> {
        self.chambers.get(id)
    }
}

fn base(server_url: &str) -> &str {
    server_url.trim_end_matches('/')
}

pub fn init_info_url(server_url: &str) -> String {
    format!("{}/init_info", base(server_url))
}

/// `since` is the last `num_steps_taken` seen; the server holds the request
/// until something newer exists
pub fn simulation_state_url(server_url: &str, since: Option<u64>) -> String {
    match since {
        Some(step) => format!("{}/simulation_state?since={}", base(server_url), step),
        None => format!("{}/simulation_state", base(server_url)),
    }
}

/// Compiled chamber binary, served per id
pub fn chamber_url(server_url: &str, id: usize) -> String {
    format!("{}/{}/chamber.wasm", base(server_url), id)
}

/// Physics module binary used by the local page
pub fn simulation_binary_url(server_url: &str) -> String {
    format!("{}/simulation.wasm", base(server_url))
}

pub fn num_balls_url(server_url: &str) -> String {
    format!("{}/num_balls", base(server_url))
}

pub fn chambers_per_row_url(server_url: &str) -> String {
    format!("{}/chambers_per_row", base(server_url))
}

#[cfg(target_arch = "wasm32")]
pub use client::RemoteClient;

#[cfg(target_arch = "wasm32")]
mod client {
    use serde::de::DeserializeOwned;
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{Request, RequestInit, Response};

    use super::*;
    use crate::error::{HostError, HostResult};

    /// `fetch`-based client for the simulation server
    #[derive(Debug, Clone)]
    pub struct RemoteClient {
        server_url: String,
    }

    impl RemoteClient {
        pub fn new(server_url: impl Into<String>) -> Self {
            Self {
                server_url: server_url.into(),
            }
        }

        async fn fetch(&self, url: &str, method: &str, body: Option<&str>) -> HostResult<Response> {
            let opts = RequestInit::new();
            opts.set_method(method);
            if let Some(body) = body {
                opts.set_body(&JsValue::from_str(body));
            }
            let request = Request::new_with_str_and_init(url, &opts)?;
            let window =
                web_sys::window().ok_or_else(|| HostError::Network("no window".into()))?;
            let response: Response = JsFuture::from(window.fetch_with_request(&request))
                .await
                .map_err(|e| HostError::Network(format!("{} {}: {:?}", method, url, e)))?
                .dyn_into()
                .map_err(|_| HostError::Network("fetch did not return a Response".into()))?;
            if !response.ok() {
                return Err(HostError::Network(format!(
                    "{} {}: HTTP {}",
                    method,
                    url,
                    response.status()
                )));
            }
            Ok(response)
        }

        async fn json<T: DeserializeOwned>(&self, url: &str) -> HostResult<T> {
            let response = self.fetch(url, "GET", None).await?;
            let text = JsFuture::from(response.text()?).await?;
            let text = text
                .as_string()
                .ok_or_else(|| HostError::Network(format!("{}: body is not text", url)))?;
            Ok(serde_json::from_str(&text)?)
        }

        pub async fn bytes(&self, url: &str) -> HostResult<Vec<u8>> {
            let response = self.fetch(url, "GET", None).await?;
            let buffer = JsFuture::from(response.array_buffer()?).await?;
            Ok(js_sys::Uint8Array::new(&buffer).to_vec())
        }

        pub async fn init_info(&self) -> HostResult<InitInfo> {
            self.json(&init_info_url(&self.server_url)).await
        }

        pub async fn simulation_state(&self, since: Option<u64>) -> HostResult<SimulationSnapshot> {
            self.json(&simulation_state_url(&self.server_url, since)).await
        }

        /// Compiled chamber binary for `id`
        pub async fn chamber_binary(&self, id: usize) -> HostResult<Vec<u8>> {
            self.bytes(&chamber_url(&self.server_url, id)).await
        }

        pub async fn simulation_binary(&self) -> HostResult<Vec<u8>> {
            self.bytes(&simulation_binary_url(&self.server_url)).await
        }

        pub async fn set_num_balls(&self, num_balls: usize) -> HostResult<()> {
            let body = num_balls.to_string();
            self.fetch(&num_balls_url(&self.server_url), "PUT", Some(&body))
                .await?;
            Ok(())
        }

        pub async fn set_chambers_per_row(&self, chambers_per_row: usize) -> HostResult<()> {
            let body = chambers_per_row.to_string();
            self.fetch(&chambers_per_row_url(&self.server_url), "PUT", Some(&body))
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        assert_eq!(init_info_url(""), "/init_info");
        assert_eq!(
            simulation_state_url("http://localhost:8000/", Some(42)),
            "http://localhost:8000/simulation_state?since=42"
        );
        assert_eq!(simulation_state_url("", None), "/simulation_state");
        assert_eq!(chamber_url("", 3), "/3/chamber.wasm");
        assert_eq!(chamber_url("http://localhost:8000/", 12), "http://localhost:8000/12/chamber.wasm");
        assert_eq!(chambers_per_row_url("/api"), "/api/chambers_per_row");
        assert_eq!(simulation_binary_url("/api/"), "/api/simulation.wasm");
    }

    #[test]
    fn test_parse_snapshot() {
        let json = r#"{
            "num_steps_taken": 1200,
            "chambers": [
                {"balls": [{"pos": {"x": 0.5, "y": 0.1}, "r": 0.02}], "state": [7]},
                {"balls": []}
            ]
        }"#;
        let snapshot: SimulationSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.num_steps_taken, 1200);
        assert_eq!(snapshot.chamber(0).unwrap().state.as_bytes(), &[7]);
        assert!(snapshot.chamber(1).unwrap().state.is_empty());
        assert!(snapshot.chamber(2).is_none());
        assert!(snapshot.cell_balls.is_empty());
    }

    #[test]
    fn test_parse_init_info() {
        let json = r#"{"chamber_height": 1.5, "chambers_per_row": 4, "num_balls": 200, "chamber_ids": [0, 2, 5]}"#;
        let info: InitInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.chamber_ids, vec![0, 2, 5]);
        assert_eq!(info.chambers_per_row, 4);
    }
}
