use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::error::RenderError;
use crate::drivers::fft::PowerSpectrum;
use crate::types::ConditionedSignal;
/// Charts carry no text so they render without a font stack.
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub line: RGBColor,
    pub accent: RGBColor,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 300,
            background: RGBColor(10, 10, 10),
            line: RGBColor(255, 80, 80),
            accent: CYAN,
        }
    }
}
/// Pulse waveform against time in seconds, with a faint zero line.
pub fn render_waveform_png(
    signal: &ConditionedSignal,
    style: &PlotStyle,
) -> Result<Vec<u8>, RenderError> {
    if signal.is_empty() {
        return Err(RenderError::Empty("conditioned signal has no samples"));
    }
    let fs = signal.sample_rate_hz();
    if !(fs > 0.0) {
        return Err(RenderError::Plot(format!("invalid sample rate {fs} Hz")));
    }
    let (y_min, y_max) = signal
        .samples()
        .iter()
        .fold((0.0f32, 0.0f32), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let (y_min, y_max) = if (y_max - y_min).abs() < f32::EPSILON {
        (-1.0, 1.0)
    } else {
        (y_min * 1.05, y_max * 1.05)
    };
    let duration = signal.duration_secs().max(1.0 / fs);
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(0f32..duration, y_min..y_max)?;
        chart.draw_series(LineSeries::new(
            [(0.0, 0.0), (duration, 0.0)],
            &WHITE.mix(0.2),
        ))?;
        let series = signal
            .samples()
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f32 / fs, *v));
        chart.draw_series(LineSeries::new(series, &style.line))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
/// Power spectrum up to `max_hz`, with the cardiac band shaded and the dominant
/// peak marked.
pub fn render_spectrum_png(
    spectrum: &PowerSpectrum,
    band_hz: (f32, f32),
    max_hz: f32,
    style: &PlotStyle,
) -> Result<Vec<u8>, RenderError> {
    let freqs = spectrum.frequencies_hz();
    let shown: Vec<(f32, f32)> = freqs
        .iter()
        .copied()
        .zip(spectrum.power.iter().copied())
        .take_while(|(f, _)| *f <= max_hz)
        .collect();
    if shown.len() < 2 {
        return Err(RenderError::Empty("spectrum has no bins below the plot limit"));
    }
    let x_max = shown.last().map_or(max_hz, |(f, _)| *f);
    let y_max = shown.iter().fold(0.0f32, |acc, (_, p)| acc.max(*p)).max(1e-12) * 1.05;
    let peak = spectrum
        .band_bins(band_hz.0, band_hz.1)
        .and_then(|bins| spectrum.peak_in(bins))
        .map(|(bin, _)| spectrum.refined_frequency(bin));
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(0f32..x_max, 0f32..y_max)?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(band_hz.0, 0.0), (band_hz.1.min(x_max), y_max)],
            style.accent.mix(0.12).filled(),
        )))?;
        if let Some(f) = peak {
            chart.draw_series(LineSeries::new([(f, 0.0), (f, y_max)], &style.accent))?;
        }
        chart.draw_series(LineSeries::new(shown, &style.line))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| RenderError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::fft::SpectrumBuilder;
    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    fn tone(n: usize, fs: f32, hz: f32) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * hz * i as f32 / fs).sin())
            .collect()
    }
    #[test]
    fn waveform_renders_png() {
        let signal = ConditionedSignal::new(tone(300, 30.0, 1.2), 30.0);
        let png = render_waveform_png(&signal, &PlotStyle::default()).unwrap();
        assert_eq!(png[..8], PNG_SIGNATURE);
    }
    #[test]
    fn spectrum_renders_png() {
        let spectrum = SpectrumBuilder::with_size(1024).compute(&tone(300, 30.0, 1.2), 30.0);
        let style = PlotStyle {
            width: 320,
            height: 120,
            ..PlotStyle::default()
        };
        let png = render_spectrum_png(&spectrum, (0.7, 4.0), 6.0, &style).unwrap();
        assert_eq!(png[..8], PNG_SIGNATURE);
    }
    #[test]
    fn empty_signal_is_rejected() {
        let signal = ConditionedSignal::new(Vec::new(), 30.0);
        let err = render_waveform_png(&signal, &PlotStyle::default()).unwrap_err();
        assert!(matches!(err, RenderError::Empty(_)));
    }
}
