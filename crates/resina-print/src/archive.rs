//! Archive writers for sliced prints.
//!
//! `raw` writes a JSON document with run-length encoded layers. `SL1`
//! writes a zip with an ini header and one PNG per layer.

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder};
use serde::Serialize;
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::{config_map, MaterialPrintSpeed};
use crate::error::{PrintError, Result};
use crate::print::{Print, PrintStatistics};
use crate::raster::Raster;

/// Writes a rasterized print to disk.
pub trait Archiver: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Write `print` to `path`.
    fn export(&self, print: &Print, path: &Path) -> Result<()>;
}

fn project_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("print")
        .to_string()
}

#[derive(Serialize)]
struct RawLayer {
    level: f64,
    /// `(row, runs)` for rows with any exposed pixel.
    rows: Vec<(u32, Vec<(u8, u32)>)>,
}

#[derive(Serialize)]
struct RawDocument<'a> {
    format: &'static str,
    width: u32,
    height: u32,
    pixel_width: f64,
    pixel_height: f64,
    layer_height: f64,
    exposure_time: f64,
    initial_exposure_time: f64,
    faded_layers: u32,
    statistics: &'a PrintStatistics,
    layers: Vec<RawLayer>,
}

fn raw_layer(level: f64, raster: &Raster) -> RawLayer {
    let rows = (0..raster.height())
        .filter_map(|row| {
            let runs = raster.encode_row(row);
            let exposed = runs.iter().any(|&(v, _)| v > 0);
            exposed.then_some((row, runs))
        })
        .collect();
    RawLayer { level, rows }
}

/// JSON dump of the rasters, for tooling and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawArchiver;

impl Archiver for RawArchiver {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn export(&self, print: &Print, path: &Path) -> Result<()> {
        let settings = print.raster_settings();
        let material = print.material_config();
        let doc = RawDocument {
            format: "resina-raw-1",
            width: settings.width,
            height: settings.height,
            pixel_width: settings.pixel_w,
            pixel_height: settings.pixel_h,
            layer_height: print.default_object_config().layer_height,
            exposure_time: material.exposure_time,
            initial_exposure_time: material.initial_exposure_time,
            faded_layers: print.default_object_config().faded_layers,
            statistics: print.statistics(),
            layers: print
                .layers()
                .iter()
                .zip(print.rasters())
                .map(|(layer, raster)| raw_layer(layer.level(), raster))
                .collect(),
        };
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &doc).map_err(|e| PrintError::Export(e.to_string()))?;
        writer.flush()?;
        Ok(())
    }
}

/// Zip archive for SL1 class printers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sl1Archiver;

fn ini_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The `config.ini` the printer firmware reads.
fn printer_ini(print: &Print, project: &str) -> String {
    let stats = print.statistics();
    let material = print.material_config();
    let object = print.default_object_config();
    let profile = match material.material_print_speed {
        MaterialPrintSpeed::Slow => 1,
        MaterialPrintSpeed::Fast => 0,
        MaterialPrintSpeed::HighViscosity => 2,
    };
    let hollow = print
        .objects()
        .iter()
        .any(|po| po.config().hollowing_enable);
    let entries = [
        ("action", "print".to_string()),
        ("jobDir", project.to_string()),
        ("layerHeight", object.layer_height.to_string()),
        ("expTime", material.exposure_time.to_string()),
        ("expTimeFirst", material.initial_exposure_time.to_string()),
        ("expUserProfile", profile.to_string()),
        ("numFade", object.faded_layers.to_string()),
        ("numSlow", stats.slow_layers_count.to_string()),
        ("numFast", stats.fast_layers_count.to_string()),
        ("printTime", stats.estimated_print_time.to_string()),
        ("usedMaterial", stats.used_material_ml().to_string()),
        ("hollow", u8::from(hollow).to_string()),
    ];
    entries
        .iter()
        .map(|(k, v)| format!("{k} = {v}\n"))
        .collect()
}

/// Every option the print was sliced with.
fn full_ini(print: &Print) -> Result<String> {
    let mut out = String::new();
    let maps = [
        config_map(print.print_config())?,
        config_map(print.printer_config())?,
        config_map(print.material_config())?,
        config_map(print.default_object_config())?,
    ];
    for map in &maps {
        for (k, v) in map {
            out.push_str(&format!("{k} = {}\n", ini_value(v)));
        }
    }
    Ok(out)
}

fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(Cursor::new(&mut buf), CompressionType::Fast, FilterType::NoFilter);
    encoder
        .write_image(raster.pixels(), raster.width(), raster.height(), ColorType::L8.into())
        .map_err(|e| PrintError::Export(e.to_string()))?;
    Ok(buf)
}

impl Archiver for Sl1Archiver {
    fn extension(&self) -> &'static str {
        "sl1"
    }

    fn export(&self, print: &Print, path: &Path) -> Result<()> {
        let project = project_name(path);
        let zip_err = |e: zip::result::ZipError| PrintError::Export(e.to_string());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let mut zip = ZipWriter::new(BufWriter::new(File::create(path)?));
        zip.start_file("config.ini", options).map_err(zip_err)?;
        zip.write_all(printer_ini(print, &project).as_bytes())?;
        zip.start_file("resina.ini", options).map_err(zip_err)?;
        zip.write_all(full_ini(print)?.as_bytes())?;

        for (i, raster) in print.rasters().iter().enumerate() {
            let png = encode_png(raster)?;
            zip.start_file(format!("{project}{i:05}.png"), options)
                .map_err(zip_err)?;
            zip.write_all(&png)?;
        }
        let mut writer = zip.finish().map_err(zip_err)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::FullPrintConfig;
    use crate::job::{JobControl, SimpleJob};
    use crate::model::{Model, ModelInstance, ModelObject};
    use resina_mesh::primitives::cube;

    fn sliced() -> Print {
        let mut cfg = FullPrintConfig::default();
        cfg.printer.display_width = 32.0;
        cfg.printer.display_height = 16.0;
        cfg.printer.display_pixels_x = 32;
        cfg.printer.display_pixels_y = 16;
        cfg.material.initial_layer_height = 1.0;
        cfg.object.layer_height = 1.0;
        cfg.object.supports_enable = false;
        cfg.object.pad_enable = false;

        let mut mo = ModelObject::new("block", cube(4.0, 2.0, 3.0));
        mo.instances = vec![ModelInstance::at(2.0, 3.0)];
        let mut model = Model::new();
        model.add_object(mo);

        let mut print = Print::new();
        print.apply(&model, &cfg).unwrap();
        let job: Arc<dyn JobControl> = Arc::new(SimpleJob::new());
        print.process(&job).unwrap();
        print
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("resina-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_raw_archive_layers() {
        let print = sliced();
        let path = temp_path("raw.json");
        RawArchiver.export(&print, &path).unwrap();
        let doc: Value = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(doc["width"], 32);
        let layers = doc["layers"].as_array().unwrap();
        assert_eq!(layers.len(), 3);
        let rows = layers[0]["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], 3);
        assert_eq!(rows[0][1], serde_json::json!([[0, 2], [255, 4], [0, 26]]));
    }

    #[test]
    fn test_printer_ini() {
        let print = sliced();
        let ini = printer_ini(&print, "block");
        assert!(ini.contains("jobDir = block\n"));
        assert!(ini.contains("numFast = 3\n"));
        assert!(ini.contains("expUserProfile = 0\n"));
        assert!(ini.contains("hollow = 0\n"));
        let full = full_ini(&print).unwrap();
        assert!(full.contains("display_pixels_x = 32\n"));
        assert!(full.contains("sla_archive_format = SL1\n"));
    }

    #[test]
    fn test_sl1_archive_contents() {
        let print = sliced();
        let path = temp_path("block.sl1");
        print.export(&path).unwrap();
        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        let project = project_name(&path);
        assert_eq!(
            names,
            vec![
                "config.ini".to_string(),
                format!("{project}00000.png"),
                format!("{project}00001.png"),
                format!("{project}00002.png"),
                "resina.ini".to_string(),
            ]
        );
        let mut png = Vec::new();
        std::io::Read::read_to_end(&mut archive.by_name(&names[1]).unwrap(), &mut png).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        std::fs::remove_file(&path).ok();
    }
}
