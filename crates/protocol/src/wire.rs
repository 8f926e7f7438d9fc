//! Wire-Format fuer TLS-Verbindungen
//!
//! Frame-basiertes Protokoll: ASCII-Laengenkopf fester Breite + Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +---+---+---+---+----...----+
//! | "5" " " " " " "| close     |
//! +---+---+---+---+----...----+
//!   Kopf (4 Bytes)   Payload
//! ```
//!
//! Der Kopf enthaelt die Payload-Laenge als Dezimalzahl, linksbuendig und
//! mit Leerzeichen aufgefuellt. Die Kopfbreite ist konfigurierbar
//! (Standard: 4 Bytes, also maximal 9999 Bytes Payload).
//!
//! Zwei Payloads sind reserviert und erreichen nie den Nachrichten-Handler:
//! `ping` (Keepalive) und `close` (Client beendet die Verbindung).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-Breite des Laengenkopfs in Bytes
pub const DEFAULT_KOPF_LAENGE: usize = 4;

/// Standard-maximale Payload-Groesse (1 MB, begrenzt zusaetzlich durch die Kopfbreite)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Keepalive-Payload
pub const PING: &[u8] = b"ping";

/// Payload mit der der Client die Verbindung beendet
pub const CLOSE: &[u8] = b"close";

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein dekodierter Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 4-Byte `ping` – wird intern verworfen
    Ping,
    /// 5-Byte `close` – beendet die Lese-Schleife
    Schliessen,
    /// Jede andere Payload, geht an den Nachrichten-Handler
    Daten(Bytes),
}

impl Frame {
    /// Klassifiziert eine Payload anhand der reservierten Kontroll-Payloads
    pub fn aus_payload(payload: Bytes) -> Self {
        if payload.as_ref() == PING {
            Frame::Ping
        } else if payload.as_ref() == CLOSE {
            Frame::Schliessen
        } else {
            Frame::Daten(payload)
        }
    }

    /// Gibt die Payload-Bytes des Frames zurueck
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Ping => PING,
            Frame::Schliessen => CLOSE,
            Frame::Daten(b) => b,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer das laengen-praefixierte Relais-Framing
///
/// Implementiert `Decoder` (liefert `Frame`) sowie `Encoder<Frame>` und
/// `Encoder<Bytes>` fuer die Integration mit `FramedRead`/`Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Breite des ASCII-Laengenkopfs in Bytes
    kopf_laenge: usize,
    /// Maximale erlaubte Payload-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            kopf_laenge: DEFAULT_KOPF_LAENGE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit eigener Kopfbreite und Payload-Grenze
    ///
    /// Eine Kopfbreite von 0 wird auf 1 angehoben.
    pub fn with_limits(kopf_laenge: usize, max_frame_size: usize) -> Self {
        Self {
            kopf_laenge: kopf_laenge.max(1),
            max_frame_size,
        }
    }

    /// Gibt die konfigurierte Kopfbreite zurueck
    pub fn kopf_laenge(&self) -> usize {
        self.kopf_laenge
    }

    /// Effektive maximale Payload-Groesse
    ///
    /// Das Minimum aus konfigurierter Grenze und dem, was die Kopfbreite
    /// dezimal darstellen kann.
    pub fn max_payload(&self) -> usize {
        let kopf_grenze = u32::try_from(self.kopf_laenge)
            .ok()
            .and_then(|breite| 10usize.checked_pow(breite))
            .map(|n| n - 1)
            .unwrap_or(usize::MAX);
        self.max_frame_size.min(kopf_grenze)
    }

    /// Schreibt Kopf + Payload in `dst`
    pub fn kodieren(&self, payload: &[u8], dst: &mut BytesMut) -> io::Result<()> {
        if payload.len() > self.max_payload() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    payload.len(),
                    self.max_payload()
                ),
            ));
        }

        let kopf = format!("{:<breite$}", payload.len(), breite = self.kopf_laenge);
        dst.reserve(self.kopf_laenge + payload.len());
        dst.put_slice(kopf.as_bytes());
        dst.put_slice(payload);
        Ok(())
    }

    /// Parst den Laengenkopf
    fn laenge_parsen(&self, kopf: &[u8]) -> io::Result<usize> {
        let text = std::str::from_utf8(kopf)
            .map_err(|_| ungueltiger_kopf(kopf))?
            .trim_matches(|c: char| c.is_ascii_whitespace());

        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ungueltiger_kopf(kopf));
        }

        text.parse::<usize>().map_err(|_| ungueltiger_kopf(kopf))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn ungueltiger_kopf(kopf: &[u8]) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "Ungueltiger Laengenkopf: {:?}",
            String::from_utf8_lossy(kopf)
        ),
    )
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf den vollstaendigen Kopf
        if src.len() < self.kopf_laenge {
            return Ok(None);
        }

        let length = self.laenge_parsen(&src[..self.kopf_laenge])?;

        if length > self.max_payload() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length,
                    self.max_payload()
                ),
            ));
        }

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let total_size = self.kopf_laenge + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(self.kopf_laenge);
        let payload = src.split_to(length).freeze();

        Ok(Some(Frame::aus_payload(payload)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            // Stream endet mitten im Frame
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Verbindung mitten im Frame beendet ({} Bytes offen)", buf.len()),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierungen
// ---------------------------------------------------------------------------

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.kodieren(item.payload(), dst)
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.kodieren(&item, dst)
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen fuer direktes async Lesen/Schreiben
// ---------------------------------------------------------------------------

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// # Fehler
/// - `UnexpectedEof` wenn die Verbindung vor Abschluss des Frames getrennt wird
/// - `InvalidData` bei ungueltigem Kopf oder zu grossem Frame
pub async fn read_frame<R>(reader: &mut R, codec: &FrameCodec) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut kopf = vec![0u8; codec.kopf_laenge()];
    reader.read_exact(&mut kopf).await?;
    let length = codec.laenge_parsen(&kopf)?;

    if length > codec.max_payload() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                length,
                codec.max_payload()
            ),
        ));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    Ok(Frame::aus_payload(Bytes::from(payload)))
}

/// Schreibt eine Payload als einzelnen Frame in einen `AsyncWrite`
///
/// # Fehler
/// - `InvalidData` wenn die Payload nicht in den Kopf passt
/// - IO-Fehler beim Schreiben
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], codec: &FrameCodec) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    codec.kodieren(payload, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kopf_ist_linksbuendig_mit_leerzeichen() {
        let codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.kodieren(b"ping", &mut buf).unwrap();
        assert_eq!(&buf[..], b"4   ping");

        let mut buf = BytesMut::new();
        codec.kodieren(b"close", &mut buf).unwrap();
        assert_eq!(&buf[..], b"5   close");
    }

    #[test]
    fn kontroll_frames_werden_erkannt() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"4   ping5   close"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Ping));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Schliessen));
        assert!(buf.is_empty());
    }

    #[test]
    fn ping_mit_anderer_laenge_ist_daten() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"5   ping!"[..]);
        let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(frame, Frame::Daten(Bytes::from_static(b"ping!")));
    }

    #[test]
    fn daten_frame_mit_gepolstertem_kopf() {
        let mut codec = FrameCodec::new();
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
        let roh = format!("56  {}", text);
        let mut buf = BytesMut::from(roh.as_bytes());

        let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(frame.payload(), text.as_bytes());
    }

    #[test]
    fn kopf_ohne_leerzeichen_bei_voller_breite() {
        let mut codec = FrameCodec::new();
        let payload = vec![b'x'; 8671];
        let mut buf = BytesMut::from(&b"8671"[..]);
        buf.extend_from_slice(&payload);

        let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(frame.payload().len(), 8671);
    }

    #[test]
    fn unvollstaendiger_frame_wartet() {
        let mut codec = FrameCodec::new();

        let mut buf = BytesMut::from(&b"12"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&b"10  halb"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"fertig");
        let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(frame.payload(), b"halbfertig");
    }

    #[test]
    fn ungueltiger_kopf_wird_abgelehnt() {
        let mut codec = FrameCodec::new();
        for kopf in [&b"abcd"[..], b"    ", b"1 2 ", b"+4  "] {
            let mut buf = BytesMut::from(kopf);
            let fehler = codec.decode(&mut buf).unwrap_err();
            assert_eq!(fehler.kind(), io::ErrorKind::InvalidData, "Kopf {:?}", kopf);
        }
    }

    #[test]
    fn zu_grosser_frame_wird_abgelehnt() {
        let mut codec = FrameCodec::with_limits(4, 100);
        let mut buf = BytesMut::from(&b"200 "[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn max_payload_durch_kopfbreite_begrenzt() {
        assert_eq!(FrameCodec::new().max_payload(), 9999);
        assert_eq!(FrameCodec::with_limits(8, 1024).max_payload(), 1024);
        assert_eq!(FrameCodec::with_limits(2, 1024).max_payload(), 99);
    }

    #[test]
    fn kodieren_lehnt_zu_grosse_payload_ab() {
        let codec = FrameCodec::with_limits(2, 1024);
        let mut buf = BytesMut::new();
        assert!(codec.kodieren(&[0u8; 100], &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn eof_mitten_im_frame_ist_unexpected_eof() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"9   abc"[..]);
        let fehler = codec.decode_eof(&mut buf).unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::UnexpectedEof);

        let mut leer = BytesMut::new();
        assert!(codec.decode_eof(&mut leer).unwrap().is_none());
    }

    #[test]
    fn mehrere_frames_im_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        for text in ["eins", "zwei", "drei"] {
            codec
                .encode(Bytes::copy_from_slice(text.as_bytes()), &mut buf)
                .unwrap();
        }

        for text in ["eins", "zwei", "drei"] {
            let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
            assert_eq!(frame.payload(), text.as_bytes());
        }
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn async_write_read_frame() {
        let codec = FrameCodec::new();
        let mut buffer: Vec<u8> = Vec::new();
        write_frame(&mut buffer, b"hallo", &codec).await.unwrap();
        assert_eq!(&buffer[..], b"5   hallo");

        let mut cursor = io::Cursor::new(buffer);
        let frame = read_frame(&mut cursor, &codec).await.unwrap();
        assert_eq!(frame, Frame::Daten(Bytes::from_static(b"hallo")));
    }

    #[tokio::test]
    async fn async_read_frame_abgeschnitten() {
        let codec = FrameCodec::new();
        let mut cursor = io::Cursor::new(b"9   abc".to_vec());
        let fehler = read_frame(&mut cursor, &codec).await.unwrap_err();
        assert_eq!(fehler.kind(), io::ErrorKind::UnexpectedEof);
    }
}
