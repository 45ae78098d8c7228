//! netrc credentials.

use std::io;
use std::path::Path;

/// Parsed netrc machine entries.
#[derive(Debug, Default)]
pub struct Netrc {
    machines: Vec<Machine>,
    default: Option<(String, String)>,
}

#[derive(Debug)]
struct Machine {
    name: String,
    login: String,
    password: String,
}

impl Netrc {
    pub fn load(path: &Path) -> io::Result<Netrc> {
        Ok(Netrc::parse(&std::fs::read_to_string(path)?))
    }

    pub fn parse(text: &str) -> Netrc {
        let mut netrc = Netrc::default();
        let mut tokens = text.split_whitespace();
        let mut current: Option<Machine> = None;
        let mut is_default = false;
        let mut login = String::new();
        let mut password = String::new();

        let mut flush = |current: &mut Option<Machine>,
                         is_default: &mut bool,
                         login: &mut String,
                         password: &mut String,
                         netrc: &mut Netrc| {
            if let Some(mut machine) = current.take() {
                machine.login = std::mem::take(login);
                machine.password = std::mem::take(password);
                netrc.machines.push(machine);
            } else if *is_default {
                netrc.default = Some((std::mem::take(login), std::mem::take(password)));
            }
            *is_default = false;
        };

        while let Some(token) = tokens.next() {
            match token {
                "machine" => {
                    flush(&mut current, &mut is_default, &mut login, &mut password, &mut netrc);
                    if let Some(name) = tokens.next() {
                        current = Some(Machine {
                            name: name.to_ascii_lowercase(),
                            login: String::new(),
                            password: String::new(),
                        });
                    }
                }
                "default" => {
                    flush(&mut current, &mut is_default, &mut login, &mut password, &mut netrc);
                    is_default = true;
                }
                "login" => login = tokens.next().unwrap_or_default().to_owned(),
                "password" => password = tokens.next().unwrap_or_default().to_owned(),
                // macdef and account are not interesting here
                _ => {}
            }
        }
        flush(&mut current, &mut is_default, &mut login, &mut password, &mut netrc);

        netrc
    }

    /// Credentials for `host`, falling back to the `default` entry.
    pub fn lookup(&self, host: &str) -> Option<(&str, &str)> {
        self.machines
            .iter()
            .find(|machine| machine.name.eq_ignore_ascii_case(host))
            .map(|machine| (machine.login.as_str(), machine.password.as_str()))
            .or(self
                .default
                .as_ref()
                .map(|(login, password)| (login.as_str(), password.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::Netrc;

    #[test]
    fn test_parse_and_lookup() {
        let netrc = Netrc::parse(
            "machine files.example.com login alice password s3cret\n\
             machine other.org\n  login bob\n  password hunter2\n\
             default login anon password guest\n",
        );
        assert_eq!(netrc.lookup("files.example.com"), Some(("alice", "s3cret")));
        assert_eq!(netrc.lookup("OTHER.ORG"), Some(("bob", "hunter2")));
        assert_eq!(netrc.lookup("unknown.net"), Some(("anon", "guest")));
    }

    #[test]
    fn test_no_default() {
        let netrc = Netrc::parse("machine a.example login x password y");
        assert_eq!(netrc.lookup("b.example"), None);
    }
}
