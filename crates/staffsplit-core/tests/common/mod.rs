#![allow(dead_code)]

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use staffsplit_ports::omr::{MusicXmlPayload, OmrError, OmrOptions, OmrOutput, OmrPort};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Staff tops for a page with three well separated systems.
pub const THREE_STAVES: [u32; 3] = [30, 160, 290];

pub fn page_png(staff_tops: &[u32]) -> Vec<u8> {
    let mut image = GrayImage::from_pixel(160, 400, Luma([200]));
    for &top in staff_tops {
        for line in 0..5 {
            let row = top + line * 12;
            for y in row..row + 2 {
                for x in 0..160 {
                    image.put_pixel(x, y, Luma([40]));
                }
            }
        }
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode page");
    buf.into_inner()
}

/// A single-part document without measures, as engines return for an
/// unreadable strip.
pub fn empty_part_xml() -> String {
    strip_xml(None, 0)
}

/// A single-part document with one whole note per measure.
pub fn strip_xml(fifths: Option<i32>, measures: usize) -> String {
    let mut body = String::new();
    for number in 1..=measures {
        body.push_str(&format!(r#"<measure number="{number}">"#));
        if number == 1 {
            if let Some(fifths) = fifths {
                body.push_str(&format!(
                    "<attributes><key><fifths>{fifths}</fifths></key></attributes>"
                ));
            }
        }
        body.push_str(
            "<note><pitch><step>C</step><octave>4</octave></pitch>\
             <duration>4</duration><type>whole</type></note>",
        );
        body.push_str("</measure>");
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="3.1">
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">{body}</part>
</score-partwise>"#
    )
}

#[derive(Clone, Debug)]
pub enum Reply {
    Xml(String),
    Fail,
    EngineTimeout,
    Hang(Duration, String),
    /// MusicXML plus the path of a log the engine kept.
    Logged(String, PathBuf),
}

/// Answers each strip with a canned reply picked by strip index.
pub struct FakeOmr {
    replies: Vec<Reply>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeOmr {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl OmrPort for FakeOmr {
    fn recognize_png(&self, png: &[u8], options: &OmrOptions) -> Result<OmrOutput, OmrError> {
        assert!(png.starts_with(b"\x89PNG"), "strip must arrive as PNG");
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let reply = self
            .replies
            .get(options.strip_index)
            .cloned()
            .unwrap_or(Reply::Fail);
        let result = match reply {
            Reply::Xml(xml) => Ok((xml, None)),
            Reply::Fail => Err(OmrError::RecognitionFailed("no staff found".to_string())),
            Reply::EngineTimeout => Err(OmrError::Timeout(Duration::from_secs(1))),
            Reply::Hang(pause, xml) => {
                std::thread::sleep(pause);
                Ok((xml, None))
            }
            Reply::Logged(xml, log) => Ok((xml, Some(log))),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|(xml, diagnostics_path)| OmrOutput {
            musicxml: MusicXmlPayload::Plain(xml),
            diagnostics_path,
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}
