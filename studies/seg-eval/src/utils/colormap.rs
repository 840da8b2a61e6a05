use serde::{ Deserialize, Serialize };

pub type Rgb = (u8, u8, u8);

/// Sequential colormaps, low values first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Blues,
    Greens,
    Oranges,
    Reds,
    Purples,
    Greys,
    Viridis,
}

const BLUES: [u32; 9] = [
    0xf7fbff, 0xdeebf7, 0xc6dbef, 0x9ecae1, 0x6baed6, 0x4292c6, 0x2171b5, 0x08519c, 0x08306b,
];
const GREENS: [u32; 9] = [
    0xf7fcf5, 0xe5f5e0, 0xc7e9c0, 0xa1d99b, 0x74c476, 0x41ab5d, 0x238b45, 0x006d2c, 0x00441b,
];
const ORANGES: [u32; 9] = [
    0xfff5eb, 0xfee6ce, 0xfdd0a2, 0xfdae6b, 0xfd8d3c, 0xf16913, 0xd94801, 0xa63603, 0x7f2704,
];
const REDS: [u32; 9] = [
    0xfff5f0, 0xfee0d2, 0xfcbba1, 0xfc9272, 0xfb6a4a, 0xef3b2c, 0xcb181d, 0xa50f15, 0x67000d,
];
const PURPLES: [u32; 9] = [
    0xfcfbfd, 0xefedf5, 0xdadaeb, 0xbcbddc, 0x9e9ac8, 0x807dba, 0x6a51a3, 0x54278f, 0x3f007d,
];
const GREYS: [u32; 9] = [
    0xffffff, 0xf0f0f0, 0xd9d9d9, 0xbdbdbd, 0x969696, 0x737373, 0x525252, 0x252525, 0x000000,
];
const VIRIDIS: [u32; 10] = [
    0x440154, 0x482878, 0x3e4989, 0x31688e, 0x26828e, 0x1f9e89, 0x35b779, 0x6ece58, 0xb5de2b,
    0xfde725,
];

fn unpack(hex: u32) -> [f64; 3] {
    [((hex >> 16) & 0xff) as f64, ((hex >> 8) & 0xff) as f64, (hex & 0xff) as f64]
}

impl Colormap {
    fn anchors(self) -> &'static [u32] {
        match self {
            Colormap::Blues => &BLUES,
            Colormap::Greens => &GREENS,
            Colormap::Oranges => &ORANGES,
            Colormap::Reds => &REDS,
            Colormap::Purples => &PURPLES,
            Colormap::Greys => &GREYS,
            Colormap::Viridis => &VIRIDIS,
        }
    }

    /// Colour at `t` in `[0, 1]`, linearly interpolated between anchors.
    pub fn sample(self, t: f64) -> Rgb {
        let anchors = self.anchors();
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let position = t * ((anchors.len() - 1) as f64);
        let low = position.floor() as usize;
        let high = (low + 1).min(anchors.len() - 1);
        let frac = position - (low as f64);

        let (a, b) = (unpack(anchors[low]), unpack(anchors[high]));
        let mix = |i: usize| (a[i] + (b[i] - a[i]) * frac).round() as u8;
        (mix(0), mix(1), mix(2))
    }
}

/// WCAG relative luminance of an sRGB colour.
pub fn relative_luminance((r, g, b): Rgb) -> f64 {
    let channel = |c: u8| {
        let c = (c as f64) / 255.0;
        if c <= 0.03928 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
    };
    0.2126 * channel(r) + 0.7152 * channel(g) + 0.0722 * channel(b)
}

/// Black text on light cells, white on dark ones.
pub fn ink_for(fill: Rgb) -> Rgb {
    if relative_luminance(fill) > 0.408 { (0, 0, 0) } else { (255, 255, 255) }
}
