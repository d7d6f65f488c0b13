#![allow(dead_code)]

use std::{fs, path::Path};

use tower_control::{Tower, TowerConfig};

pub const FLIGHT_PLANS: &str = "\
voo,origem,destino,etd,eta,aeronave,tipo,prioridade,pista_pref,piloto
TAM101,SBGR,SBRJ,10:00,11:00,PR-ABC,REGULAR,5,09,P-1
TAM102,SBGR,SBPA,10:05,11:40,PR-ABC,REGULAR,3,27,P-1
GLO9,SBPA,SBGR,09:00,10:30,PR-XYZ,EMERGENCIA,9,09,P-2
AZU7,SBKP,SBGR,12:00,12:50,PR-XYZ,REGULAR,2,09,
";

pub const FLEET: &str = "aeronave,modelo\nPR-ABC,A320\nPR-XYZ,E195\n";

pub const PILOTS: &str = "matricula,nome,licenca\nP-1,Ana Souza,PLA-1\n";

/// Config rooted at `dir`, with reference data and an all-open airfield.
pub fn airfield(dir: &Path) -> TowerConfig {
    let config = TowerConfig {
        data_dir: dir.join("data"),
        log_dir: dir.join("logs"),
        report_dir: dir.join("reports"),
        ..TowerConfig::default()
    };
    fs::create_dir_all(&config.data_dir).unwrap();
    fs::write(config.flights_path(), FLIGHT_PLANS).unwrap();
    fs::write(config.fleet_path(), FLEET).unwrap();
    fs::write(config.pilots_path(), PILOTS).unwrap();
    set_runways(&config, "09,OPEN\n27,OPEN\n");
    config
}

pub fn set_runways(config: &TowerConfig, body: &str) {
    fs::write(config.runways_path(), body).unwrap();
}

pub fn set_notams(config: &TowerConfig, body: &str) {
    fs::write(config.notams_path(), body).unwrap();
}

pub fn set_metars(config: &TowerConfig, body: &str) {
    fs::write(config.metars_path(), body).unwrap();
}

pub fn open(config: &TowerConfig) -> Tower {
    Tower::builder().config(config.clone()).build().unwrap()
}

/// Audit lines whose outcome is a decision (clearance or denial).
pub fn decision_lines(tower: &Tower) -> Vec<String> {
    tower
        .audit()
        .lines()
        .unwrap()
        .into_iter()
        .filter(|line| line.contains("| CLEARED") || line.contains("| DENIED: "))
        .collect()
}
