//! robots.txt parsing.
//!
//! Only the rules addressed to every agent (`User-agent: *`) matter:
//! their `Disallow` path prefixes, plus any `Sitemap` URLs, which are
//! global to the file.

/// Parsed robots descriptor for one host.
#[derive(Debug, Default, Clone)]
pub struct Robots {
    /// Path prefixes closed to us.
    pub disallow: Vec<String>,
    /// Sitemap URLs announced by the file.
    pub sitemaps: Vec<String>,
}

impl Robots {
    pub fn parse(text: &str) -> Robots {
        let mut robots = Robots::default();
        let mut in_star_group = false;
        let mut last_was_rule = false;

        for line in text.lines() {
            let line = match line.find('#') {
                Some(at) => &line[..at],
                None => line,
            };
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim();
            let value = value.trim();

            if field.eq_ignore_ascii_case("user-agent") {
                // a user-agent line after rules starts a new group
                if last_was_rule {
                    in_star_group = false;
                }
                last_was_rule = false;
                if value == "*" {
                    in_star_group = true;
                }
            } else if field.eq_ignore_ascii_case("disallow") {
                last_was_rule = true;
                if in_star_group && !value.is_empty() {
                    robots.disallow.push(value.to_owned());
                }
            } else if field.eq_ignore_ascii_case("sitemap") {
                if !value.is_empty() {
                    robots.sitemaps.push(value.to_owned());
                }
            } else {
                last_was_rule = true;
            }
        }

        robots
    }

    /// `path` starts with one of the disallow prefixes.
    pub fn disallows(&self, path: &str) -> bool {
        self.disallow.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::Robots;

    #[test]
    fn test_parse() {
        let robots = Robots::parse(
            "# taken from a real site\n\
             User-agent: gobbler\n\
             Disallow: /\n\
             \n\
             User-agent: *\n\
             Disallow: /private/\n\
             Disallow: /tmp/ # trailing comment\n\
             Allow: /tmp/ok\n\
             \n\
             Sitemap: http://example.com/sitemap.xml\n",
        );
        assert_eq!(robots.disallow, vec!["/private/", "/tmp/"]);
        assert_eq!(robots.sitemaps, vec!["http://example.com/sitemap.xml"]);

        assert!(robots.disallows("/private/x.html"));
        assert!(!robots.disallows("/public/x.html"));
    }

    #[test]
    fn test_group_boundaries() {
        // rules under a named agent do not apply to us
        let robots = Robots::parse("User-agent: other\nDisallow: /all\n");
        assert!(robots.disallow.is_empty());

        // adjacent user-agent lines share one group
        let robots = Robots::parse("User-agent: other\nUser-agent: *\nDisallow: /x\n");
        assert_eq!(robots.disallow, vec!["/x"]);
    }

    #[test]
    fn test_empty_disallow_allows_all() {
        let robots = Robots::parse("User-agent: *\nDisallow:\n");
        assert!(robots.disallow.is_empty());
    }
}
