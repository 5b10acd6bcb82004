//! LVM reports from `vgs`, `pvs` and `lvs`.

use anyhow::{Context, Error};
use serde::{de::DeserializeOwned, Deserialize};

use crate::dependencies::Dependency;

const REPORT_ARGS: [&str; 5] = ["--reportformat", "json", "--units", "b", "--nosuffix"];

#[derive(Deserialize, Debug)]
struct Reports<T> {
    report: Vec<T>,
}

#[derive(Deserialize, Debug)]
struct VgReport {
    vg: Vec<Vg>,
}

#[derive(Deserialize, Debug)]
struct PvReport {
    pv: Vec<Pv>,
}

#[derive(Deserialize, Debug)]
struct LvReport {
    lv: Vec<Lv>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Vg {
    pub vg_name: String,
    pub vg_uuid: String,
    #[serde(deserialize_with = "size")]
    pub vg_extent_size: u64,
    #[serde(deserialize_with = "size")]
    pub vg_extent_count: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pv {
    pub pv_name: String,
    pub pv_uuid: String,
    /// Empty if the physical volume is not part of a volume group.
    #[serde(default)]
    pub vg_name: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Lv {
    pub lv_name: String,
    pub lv_uuid: String,
    pub vg_name: String,
    #[serde(deserialize_with = "size")]
    pub lv_size: u64,
    /// `active` or empty.
    #[serde(default)]
    pub lv_active: String,
}

impl Lv {
    pub fn is_active(&self) -> bool {
        self.lv_active == "active"
    }
}

fn size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.trim().parse().map_err(serde::de::Error::custom)
}

fn parse_report<R: DeserializeOwned>(output: &str) -> Result<Vec<R>, Error> {
    let reports: Reports<R> =
        serde_json::from_str(output).context("Failed to parse LVM report")?;
    Ok(reports.report)
}

pub fn parse_vgs(output: &str) -> Result<Vec<Vg>, Error> {
    Ok(parse_report::<VgReport>(output)?
        .into_iter()
        .flat_map(|report| report.vg)
        .collect())
}

pub fn parse_pvs(output: &str) -> Result<Vec<Pv>, Error> {
    Ok(parse_report::<PvReport>(output)?
        .into_iter()
        .flat_map(|report| report.pv)
        .collect())
}

pub fn parse_lvs(output: &str) -> Result<Vec<Lv>, Error> {
    Ok(parse_report::<LvReport>(output)?
        .into_iter()
        .flat_map(|report| report.lv)
        .collect())
}

pub fn vgs() -> Result<Vec<Vg>, Error> {
    let output = Dependency::Vgs
        .cmd()
        .with_args(REPORT_ARGS)
        .with_args(["--options", "vg_name,vg_uuid,vg_extent_size,vg_extent_count"])
        .output_and_check()
        .context("Failed to execute vgs")?;
    parse_vgs(&output)
}

pub fn pvs() -> Result<Vec<Pv>, Error> {
    let output = Dependency::Pvs
        .cmd()
        .with_args(REPORT_ARGS)
        .with_args(["--options", "pv_name,pv_uuid,vg_name"])
        .output_and_check()
        .context("Failed to execute pvs")?;
    parse_pvs(&output)
}

pub fn lvs() -> Result<Vec<Lv>, Error> {
    let output = Dependency::Lvs
        .cmd()
        .with_args(REPORT_ARGS)
        .with_args(["--options", "lv_name,lv_uuid,vg_name,lv_size,lv_active"])
        .output_and_check()
        .context("Failed to execute lvs")?;
    parse_lvs(&output)
}
