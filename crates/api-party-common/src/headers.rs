//! Lossless header merging.

use http::HeaderMap;

/// Merges header sets in order, keeping every entry.
///
/// Absent sources are skipped. Repeated names from different sources are all kept
/// as separate entries instead of the later one replacing the earlier one, so
/// multi-valued headers such as `Set-Cookie` survive.
///
/// # Examples
///
/// ```
/// use http::{HeaderMap, HeaderValue, header::SET_COOKIE};
/// use api_party_common::merge_headers;
///
/// let mut a = HeaderMap::new();
/// a.insert(SET_COOKIE, HeaderValue::from_static("a=1"));
/// let mut b = HeaderMap::new();
/// b.insert(SET_COOKIE, HeaderValue::from_static("b=2"));
///
/// let merged = merge_headers([Some(&a), None, Some(&b)]);
/// let values: Vec<_> = merged.get_all(SET_COOKIE).iter().collect();
/// assert_eq!(values, ["a=1", "b=2"]);
/// ```
pub fn merge_headers<'a, I>(sources: I) -> HeaderMap
where
    I: IntoIterator<Item = Option<&'a HeaderMap>>,
{
    let mut merged = HeaderMap::new();
    for headers in sources.into_iter().flatten() {
        for (name, value) in headers {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use http::header::{AUTHORIZATION, HeaderName, HeaderValue, SET_COOKIE};
    use proptest::prelude::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_duplicate_keys_are_preserved() {
        let merged = merge_headers([
            Some(&headers(&[("set-cookie", "a")])),
            Some(&headers(&[("set-cookie", "b")])),
        ]);

        let values: Vec<_> = merged.get_all(SET_COOKIE).iter().collect();
        assert_eq!(values, ["a", "b"]);
    }

    #[test]
    fn test_later_sources_do_not_clobber() {
        let merged = merge_headers([
            Some(&headers(&[("authorization", "Bearer endpoint")])),
            Some(&headers(&[("authorization", "Bearer caller")])),
        ]);

        let values: Vec<_> = merged.get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values, ["Bearer endpoint", "Bearer caller"]);
    }

    #[test]
    fn test_absent_sources_are_skipped() {
        let merged = merge_headers([None, Some(&headers(&[("x-a", "1")])), None]);
        assert_eq!(merged.len(), 1);
        assert!(merge_headers([None, None]).is_empty());
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let merged = merge_headers([
            Some(&headers(&[("X-Trace", "1")])),
            Some(&headers(&[("x-trace", "2")])),
        ]);
        assert_eq!(merged.get_all("x-trace").iter().count(), 2);
    }

    proptest! {
        #[test]
        fn merge_is_lossless(
            sources in prop::collection::vec(
                prop::option::of(prop::collection::vec(
                    (prop::sample::select(vec!["set-cookie", "x-a", "x-b", "accept"]), "[a-z0-9]{1,8}"),
                    0..5,
                )),
                0..5,
            )
        ) {
            let maps: Vec<Option<HeaderMap>> = sources
                .iter()
                .map(|source| source.as_ref().map(|pairs| {
                    let pairs: Vec<(&str, &str)> = pairs.iter().map(|(n, v)| (*n, v.as_str())).collect();
                    headers(&pairs)
                }))
                .collect();

            let merged = merge_headers(maps.iter().map(Option::as_ref));

            let expected: usize = maps.iter().flatten().map(HeaderMap::len).sum();
            prop_assert_eq!(merged.len(), expected);

            for map in maps.iter().flatten() {
                for (name, value) in map {
                    prop_assert!(merged.get_all(name).iter().any(|v| v == value));
                }
            }
        }
    }
}
