use serde::Serialize;

/// One image of an [Icon format] property (`IconPixmap` and friends).
///
/// The pixel data is kept in the ARGB32 network byte order it arrives in; it is not part of the
/// serialized form.
///
/// [Icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pixmap {
    pub width: i32,
    pub height: i32,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Pixmap {
    /// Validate a raw `(iiay)` entry. Pixmaps whose data does not match their dimensions are
    /// dropped.
    pub fn from_raw(width: i32, height: i32, data: Vec<u8>) -> Option<Self> {
        if width <= 0 || height <= 0 {
            return None;
        }
        let expected = (width as usize).checked_mul(height as usize)?.checked_mul(4)?;
        if data.len() != expected {
            log::debug!("dropping pixmap of {}x{} with {} bytes of data", width, height, data.len());
            return None;
        }
        Some(Self { width, height, data })
    }
}

/// Validate a list of raw pixmaps as received over the bus, dropping the malformed ones.
pub fn pixmaps_from_raw(raw: Vec<(i32, i32, Vec<u8>)>) -> Vec<Pixmap> {
    raw.into_iter().filter_map(|(w, h, d)| Pixmap::from_raw(w, h, d)).collect()
}

/// From a list of pixmaps, pick the most appropriately sized one.
///
/// This function returns None if and only if no pixmaps are provided.
pub fn best_pixmap(pixmaps: &[Pixmap], size: i32) -> Option<&Pixmap> {
    pixmaps.iter().max_by(|p1, p2| {
        // take smallest one bigger than requested size, otherwise take biggest
        let a = size * size;
        let a1 = p1.width * p1.height;
        let a2 = p2.width * p2.height;
        match (a1 >= a, a2 >= a) {
            (true, true) => a2.cmp(&a1),
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a1.cmp(&a2),
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn pixmap(size: i32) -> Pixmap {
        Pixmap::from_raw(size, size, vec![0; (size * size * 4) as usize]).unwrap()
    }

    #[test]
    fn test_malformed_pixmaps_are_dropped() {
        let raw = vec![(2, 2, vec![0; 16]), (2, 2, vec![0; 15]), (0, 4, vec![]), (-1, 1, vec![0; 4])];
        let pixmaps = pixmaps_from_raw(raw);
        assert_eq!(pixmaps.len(), 1);
        assert_eq!((pixmaps[0].width, pixmaps[0].height), (2, 2));
    }

    #[test]
    fn test_best_pixmap_prefers_smallest_larger_one() {
        let pixmaps = vec![pixmap(16), pixmap(64), pixmap(32), pixmap(22)];
        assert_eq!(best_pixmap(&pixmaps, 24).map(|p| p.width), Some(32));
        assert_eq!(best_pixmap(&pixmaps, 16).map(|p| p.width), Some(16));
    }

    #[test]
    fn test_best_pixmap_falls_back_to_largest() {
        let pixmaps = vec![pixmap(16), pixmap(22)];
        assert_eq!(best_pixmap(&pixmaps, 48).map(|p| p.width), Some(22));
        assert_eq!(best_pixmap(&[], 48), None);
    }
}
