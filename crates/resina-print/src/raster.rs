//! Layer rasterization into display pixels.
//!
//! Polygons are scan converted with four sub-scanlines per pixel row and
//! exact horizontal coverage, then mapped through the gamma curve.

use resina_math::Point2;
use resina_mesh::ExPolygon;

use crate::config::{DisplayOrientation, SlaPrinterConfig};

/// Sub-scanlines per pixel row.
pub const SUBSAMPLES: usize = 4;

/// Geometry and tone mapping of the display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSettings {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Pixel width (mm).
    pub pixel_w: f64,
    /// Pixel height (mm).
    pub pixel_h: f64,
    /// Bed X runs along image rows.
    pub flip_xy: bool,
    /// Mirror columns.
    pub mirror_x: bool,
    /// Mirror rows.
    pub mirror_y: bool,
    /// Coverage exponent; zero or less thresholds at half coverage.
    pub gamma: f64,
}

impl RasterSettings {
    /// Settings for the display of `printer`.
    ///
    /// A portrait display swaps the image axes relative to the bed.
    pub fn from_printer(printer: &SlaPrinterConfig) -> Self {
        let (mut w, mut h) = (printer.display_width, printer.display_height);
        let (mut pw, mut ph) = (printer.display_pixels_x.max(1), printer.display_pixels_y.max(1));
        let flip_xy = printer.display_orientation == DisplayOrientation::Portrait;
        if flip_xy {
            std::mem::swap(&mut w, &mut h);
            std::mem::swap(&mut pw, &mut ph);
        }
        Self {
            width: pw,
            height: ph,
            pixel_w: w / f64::from(pw),
            pixel_h: h / f64::from(ph),
            flip_xy,
            mirror_x: printer.display_mirror_x,
            mirror_y: printer.display_mirror_y,
            gamma: printer.gamma_correction,
        }
    }

    /// Area of one pixel (mm²).
    pub fn pixel_area(&self) -> f64 {
        self.pixel_w * self.pixel_h
    }

    /// Bed point to continuous pixel coordinates (column, row).
    pub fn to_pixel(&self, p: &Point2) -> (f64, f64) {
        let (x, y) = if self.flip_xy { (p.y, p.x) } else { (p.x, p.y) };
        let mut u = x / self.pixel_w;
        let mut v = y / self.pixel_h;
        if self.mirror_x {
            u = f64::from(self.width) - u;
        }
        if self.mirror_y {
            v = f64::from(self.height) - v;
        }
        (u, v)
    }

    fn tone(&self, coverage: f64) -> u8 {
        let c = coverage.clamp(0.0, 1.0);
        let level = if self.gamma <= 0.0 {
            if c >= 0.5 {
                1.0
            } else {
                0.0
            }
        } else {
            c.powf(self.gamma)
        };
        (level * 255.0).round() as u8
    }
}

/// An 8-bit grayscale layer image, row major, row 0 first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Raster {
    /// A black image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Image width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel values.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Value at `(col, row)`; zero outside the image.
    pub fn get(&self, col: u32, row: u32) -> u8 {
        if col >= self.width || row >= self.height {
            return 0;
        }
        self.pixels[row as usize * self.width as usize + col as usize]
    }

    /// Exposed area (mm²) with partial pixels weighted by their value.
    pub fn exposed_area(&self, pixel_area: f64) -> f64 {
        let sum: f64 = self.pixels.iter().map(|&p| f64::from(p)).sum();
        sum / 255.0 * pixel_area
    }

    /// Run-length encoding of row `row` as `(value, count)` pairs.
    pub fn encode_row(&self, row: u32) -> Vec<(u8, u32)> {
        let w = self.width as usize;
        let start = row as usize * w;
        let mut runs: Vec<(u8, u32)> = Vec::new();
        for &px in self.pixels.get(start..start + w).unwrap_or(&[]) {
            match runs.last_mut() {
                Some((v, n)) if *v == px => *n += 1,
                _ => runs.push((px, 1)),
            }
        }
        runs
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    u0: f64,
    v0: f64,
    u1: f64,
    v1: f64,
}

impl Edge {
    fn u_at(&self, v: f64) -> f64 {
        self.u0 + (v - self.v0) * (self.u1 - self.u0) / (self.v1 - self.v0)
    }
}

fn collect_edges(polys: &[ExPolygon], settings: &RasterSettings) -> Vec<Edge> {
    let mut edges = Vec::new();
    for ex in polys {
        for ring in std::iter::once(&ex.contour).chain(ex.holes.iter()) {
            let n = ring.points.len();
            if n < 3 {
                continue;
            }
            for i in 0..n {
                let (ua, va) = settings.to_pixel(&ring.points[i]);
                let (ub, vb) = settings.to_pixel(&ring.points[(i + 1) % n]);
                if va == vb {
                    continue;
                }
                edges.push(if va < vb {
                    Edge { u0: ua, v0: va, u1: ub, v1: vb }
                } else {
                    Edge { u0: ub, v0: vb, u1: ua, v1: va }
                });
            }
        }
    }
    edges.sort_by(|a, b| a.v0.total_cmp(&b.v0));
    edges
}

/// Add `weight` times the overlap of `[x0, x1]` with each pixel column.
fn accumulate_span(cov: &mut [f64], x0: f64, x1: f64, weight: f64) {
    let w = cov.len() as f64;
    let (x0, x1) = (x0.clamp(0.0, w), x1.clamp(0.0, w));
    if x1 <= x0 {
        return;
    }
    let first = x0.floor() as usize;
    let last = (x1.ceil() as usize).min(cov.len());
    for (col, c) in cov.iter_mut().enumerate().take(last).skip(first) {
        let lo = x0.max(col as f64);
        let hi = x1.min(col as f64 + 1.0);
        if hi > lo {
            *c += (hi - lo) * weight;
        }
    }
}

/// Draw `polys` (bed coordinates, disjoint) into a new image.
///
/// Holes are cut by the even-odd rule.
pub fn rasterize(polys: &[ExPolygon], settings: &RasterSettings) -> Raster {
    let mut raster = Raster::new(settings.width, settings.height);
    let edges = collect_edges(polys, settings);
    if edges.is_empty() {
        return raster;
    }
    let width = settings.width as usize;
    let weight = 1.0 / SUBSAMPLES as f64;
    let mut cov = vec![0.0; width];
    let mut active: Vec<Edge> = Vec::new();
    let mut next = 0;
    let mut xs: Vec<f64> = Vec::new();

    for row in 0..settings.height as usize {
        cov.iter_mut().for_each(|c| *c = 0.0);
        let mut touched = false;
        for s in 0..SUBSAMPLES {
            let v = row as f64 + (s as f64 + 0.5) * weight;
            while next < edges.len() && edges[next].v0 <= v {
                active.push(edges[next]);
                next += 1;
            }
            active.retain(|e| e.v1 > v);
            xs.clear();
            xs.extend(active.iter().filter(|e| e.v0 <= v).map(|e| e.u_at(v)));
            if xs.len() < 2 {
                continue;
            }
            xs.sort_by(f64::total_cmp);
            for pair in xs.chunks_exact(2) {
                accumulate_span(&mut cov, pair[0], pair[1], weight);
            }
            touched = true;
        }
        if touched {
            let start = row * width;
            for (px, c) in raster.pixels[start..start + width].iter_mut().zip(&cov) {
                *px = settings.tone(*c);
            }
        }
        if next >= edges.len() && active.is_empty() {
            break;
        }
    }
    raster
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use resina_math::BoundingBox;
    use resina_mesh::Polygon;

    fn settings(w: u32, h: u32) -> RasterSettings {
        RasterSettings {
            width: w,
            height: h,
            pixel_w: 1.0,
            pixel_h: 1.0,
            flip_xy: false,
            mirror_x: false,
            mirror_y: false,
            gamma: 1.0,
        }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> ExPolygon {
        ExPolygon::new(Polygon::rectangle(&BoundingBox::new(
            Point2::new(x0, y0),
            Point2::new(x1, y1),
        )))
    }

    #[test]
    fn test_aligned_square_fills_whole_pixels() {
        let r = rasterize(&[rect(2.0, 3.0, 6.0, 5.0)], &settings(10, 10));
        assert_eq!(r.get(2, 3), 255);
        assert_eq!(r.get(5, 4), 255);
        assert_eq!(r.get(6, 4), 0);
        assert_eq!(r.get(2, 5), 0);
        assert_relative_eq!(r.exposed_area(1.0), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_partial_pixels_are_antialiased() {
        let r = rasterize(&[rect(0.5, 0.0, 2.0, 1.0)], &settings(4, 1));
        assert_eq!(r.get(0, 0), 128);
        assert_eq!(r.get(1, 0), 255);
        assert_eq!(r.get(2, 0), 0);

        let mut binary = settings(4, 1);
        binary.gamma = 0.0;
        let r = rasterize(&[rect(0.5, 0.0, 2.0, 1.0)], &binary);
        assert_eq!(r.get(0, 0), 255);
        let r = rasterize(&[rect(0.75, 0.0, 2.0, 1.0)], &binary);
        assert_eq!(r.get(0, 0), 0);
    }

    #[test]
    fn test_holes_stay_dark() {
        let ex = ExPolygon::with_holes(
            rect(0.0, 0.0, 6.0, 6.0).contour,
            vec![rect(2.0, 2.0, 4.0, 4.0).contour],
        );
        let r = rasterize(&[ex], &settings(6, 6));
        assert_eq!(r.get(0, 0), 255);
        assert_eq!(r.get(2, 2), 0);
        assert_eq!(r.get(3, 3), 0);
        assert_relative_eq!(r.exposed_area(1.0), 32.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mirror_and_portrait_mapping() {
        let mut s = settings(10, 4);
        s.mirror_x = true;
        let r = rasterize(&[rect(0.0, 0.0, 1.0, 1.0)], &s);
        assert_eq!(r.get(9, 0), 255);
        assert_eq!(r.get(0, 0), 0);

        let printer = SlaPrinterConfig {
            display_width: 20.0,
            display_height: 10.0,
            display_pixels_x: 40,
            display_pixels_y: 20,
            display_orientation: DisplayOrientation::Portrait,
            ..Default::default()
        };
        let s = RasterSettings::from_printer(&printer);
        assert_eq!((s.width, s.height), (20, 40));
        assert_relative_eq!(s.pixel_area(), 0.25);
        let (u, v) = s.to_pixel(&Point2::new(2.0, 1.0));
        assert_relative_eq!(u, 2.0);
        assert_relative_eq!(v, 4.0);
    }

    #[test]
    fn test_row_encoding() {
        let r = rasterize(&[rect(1.0, 0.0, 3.0, 1.0)], &settings(5, 1));
        assert_eq!(r.encode_row(0), vec![(0, 1), (255, 2), (0, 2)]);
        assert!(r.encode_row(3).is_empty());
    }
}
