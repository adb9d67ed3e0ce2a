#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

pub const GHG_TSV: &str = "freq,unit,geo\\TIME_PERIOD\t2021 \t2022 \n\
A,T_HAB,AT\t8.1\t7.5\n\
A,T_HAB,BE\t\t9.9\n\
A,T_HAB,DE\t9.4\t\n";

pub const ENERGY_TSV: &str = " Geo \tValue \nDE\t5\nFR\t\n";

#[derive(Clone)]
struct Route {
    status: u16,
    body: Vec<u8>,
}

/// Minimal HTTP/1.1 server on a loopback port that records hits per path.
pub struct FixtureServer {
    pub base_url: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
        let addr = listener.local_addr().expect("fixture server address");
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let thread_routes = Arc::clone(&routes);
        let thread_hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                handle(stream, &thread_routes, &thread_hits);
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            routes,
            hits,
        }
    }

    pub fn route(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) -> String {
        self.routes.lock().unwrap().insert(
            path.to_string(),
            Route {
                status,
                body: body.into(),
            },
        );
        format!("{}{path}", self.base_url)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

fn handle(
    mut stream: TcpStream,
    routes: &Mutex<HashMap<String, Route>>,
    hits: &Mutex<HashMap<String, usize>>,
) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let request = String::from_utf8_lossy(&request);
    let target = request.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    *hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    let route = routes.lock().unwrap().get(&path).cloned().unwrap_or(Route {
        status: 404,
        body: b"not found".to_vec(),
    });
    let reason = match route.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };

    let head = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: text/tab-separated-values\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        route.status,
        route.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&route.body);
    let _ = stream.flush();
}

/// Pipeline TOML for the two fixture datasets, written under `data_dir`.
pub fn fixture_config_toml(server: &FixtureServer, data_dir: &std::path::Path) -> String {
    let ghg = server.route("/data/sdg_13_10", 200, GHG_TSV);
    let energy = server.route("/data/ten00124", 200, ENERGY_TSV);
    format!(
        r#"
data_dir = "{data_dir}"

[fetch]
timeout_secs = 5
use_system_proxy = false

[[dataset]]
key = "net_greenhouse_gas_emissions"
url = "{ghg}"
raw_file = "net_greenhouse_gas_emissions.tsv"
table_name = "net_greenhouse_gas_emissions"
store_file = "database1.db"
export_file = "net_greenhouse_gas_emissions.xlsx"

[[dataset]]
key = "final_energy_consumption_by_sector"
url = "{energy}"
raw_file = "final_energy_consumption_by_sector.tsv"
table_name = "final_energy_consumption_by_sector"
store_file = "database2.db"
export_file = "final_energy_consumption_by_sector.xlsx"
"#,
        data_dir = data_dir.display().to_string().replace('\\', "/"),
    )
}
