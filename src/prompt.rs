use std::cell::RefCell;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::net::IpAddr;

pub type Validator = fn(&str) -> Result<(), String>;

pub trait Prompt {
  /// Asks until the answer passes `validate`. An empty answer takes
  /// `current`, then `default`.
  fn ask_string(
    &self,
    label: &str,
    default: &str,
    current: &str,
    validate: Option<Validator>,
  ) -> io::Result<String>;
}

pub struct Prompter<R, W> {
  input: RefCell<R>,
  output: RefCell<W>,
}

impl Prompter<BufReader<Stdin>, Stdout> {
  pub fn stdio() -> Self {
    Self::new(BufReader::new(io::stdin()), io::stdout())
  }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
  pub fn new(input: R, output: W) -> Self {
    Self {
      input: RefCell::new(input),
      output: RefCell::new(output),
    }
  }

  #[cfg(test)]
  pub fn into_output(self) -> W {
    self.output.into_inner()
  }
}

impl<R: BufRead, W: Write> Prompt for Prompter<R, W> {
  fn ask_string(
    &self,
    label: &str,
    default: &str,
    current: &str,
    validate: Option<Validator>,
  ) -> io::Result<String> {
    let mut input = self.input.borrow_mut();
    let mut output = self.output.borrow_mut();
    loop {
      if current.is_empty() {
        write!(output, "{label} [default: {default}]: ")?;
      } else {
        write!(output, "{label} [default: {default}] (current: {current}): ")?;
      }
      output.flush()?;

      let mut line = String::new();
      if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
          io::ErrorKind::UnexpectedEof,
          format!("no answer for {label}"),
        ));
      }
      let mut value = line.trim().to_string();
      if value.is_empty() {
        value = if current.is_empty() { default } else { current }.to_string();
      }

      if let Some(validate) = validate {
        if let Err(reason) = validate(&value) {
          writeln!(output, "invalid value: {reason}")?;
          continue;
        }
      }
      return Ok(value);
    }
  }
}

pub fn validate_ip(value: &str) -> Result<(), String> {
  value
    .trim()
    .parse::<IpAddr>()
    .map(|_| ())
    .map_err(|_| "must be a valid IP address".to_string())
}

pub fn validate_port(value: &str) -> Result<(), String> {
  let port: u32 = value
    .trim()
    .parse()
    .map_err(|_| "must be integer".to_string())?;
  if (1..=65535).contains(&port) {
    Ok(())
  } else {
    Err("must be in range 1..65535".to_string())
  }
}

pub fn validate_host_or_ip(value: &str) -> Result<(), String> {
  let value = value.trim();
  if value.parse::<IpAddr>().is_ok() {
    return Ok(());
  }
  if value.is_empty()
    || !value
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
  {
    return Err("must be an IP or hostname".to_string());
  }
  let bad_label = value
    .split('.')
    .any(|label| label.is_empty() || label.starts_with('-') || label.ends_with('-'));
  if bad_label {
    return Err("invalid hostname format".to_string());
  }
  Ok(())
}
